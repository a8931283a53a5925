use std::sync::Arc;
use std::time::Instant;

use chrono::Datelike;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::auth::{Credentials, IdentityProvider};
use crate::engine::{BookingTarget, Engine, EngineError, ProfileUpdate};
use crate::limits::*;
use crate::model::*;
use crate::observability::{self, command_label};
use crate::protocol::{self, Command, ErrorCode, Response};
use crate::tenant::TenantManager;

/// Serve one client: a hello line, then one response line per request line.
pub async fn process_connection<S>(
    socket: S,
    tenants: Arc<TenantManager>,
    provider: Arc<dyn IdentityProvider>,
) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    let Some(first) = lines.next().await else {
        return Ok(());
    };
    let hello = match protocol::parse_hello(&first?) {
        Ok(hello) => hello,
        Err(e) => {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            return lines.send(Response::from(&e).to_line()).await;
        }
    };

    let credentials = Credentials {
        password: hello.password,
        email: hello.email,
        full_name: hello.full_name,
        avatar_url: hello.avatar_url,
    };
    let identity = match provider.authenticate(credentials).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("authentication failed for tenant {}: {e}", hello.tenant);
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            return lines
                .send(Response::error(ErrorCode::Unauthorized, e.to_string()).to_line())
                .await;
        }
    };

    let engine = match tenants.get_or_create(&hello.tenant) {
        Ok(engine) => engine,
        Err(e) => {
            let code = match e.kind() {
                std::io::ErrorKind::InvalidInput => ErrorCode::BadRequest,
                _ => ErrorCode::LimitExceeded,
            };
            return lines
                .send(Response::error(code, format!("tenant error: {e}")).to_line())
                .await;
        }
    };
    if let Err(e) = engine.sign_in(&identity).await {
        warn!("sign-in failed for {} in tenant {}: {e}", identity.email, hello.tenant);
        return lines.send(Response::from(&e).to_line()).await;
    }

    let welcome = serde_json::json!({
        "tenant": hello.tenant,
        "user_id": identity.user_id,
        "email": identity.email,
    });
    lines.send(Response::ok(&welcome).to_line()).await?;
    debug!("{} joined tenant {}", identity.user_id, hello.tenant);

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let resp = Response::error(ErrorCode::BadRequest, "request line too long");
                lines.send(resp.to_line()).await?;
                continue;
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match protocol::parse_command(&line) {
            Ok(cmd) => {
                let label = command_label(&cmd);
                let start = Instant::now();
                let response = execute(&engine, &identity, cmd).await.unwrap_or_else(|e| Response::from(&e));
                let status = if response.ok { "ok" } else { "error" };
                metrics::counter!(observability::COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);
                metrics::histogram!(observability::COMMAND_DURATION_SECONDS, "command" => label)
                    .record(start.elapsed().as_secs_f64());
                response
            }
            Err(e) => Response::from(&e),
        };
        lines.send(response.to_line()).await?;
    }

    Ok(())
}

/// Run one command for the authenticated caller.
pub async fn execute(engine: &Engine, caller: &Identity, cmd: Command) -> Result<Response, EngineError> {
    let me = caller.user_id;
    let today = chrono::Utc::now().date_naive();

    let response = match cmd {
        Command::ListCities => Response::ok(&engine.get_cities().await),
        Command::GetCity { city } => {
            let found = engine.get_city(&city).await.ok_or_else(|| EngineError::city(&city))?;
            Response::ok(&found)
        }
        Command::CreateCity {
            slug,
            label,
            capacity,
            max_capacity,
        } => {
            let city = City {
                slug,
                label,
                capacity,
                max_capacity,
            };
            Response::ok(&engine.create_city(me, city).await?)
        }
        Command::UpdateCity {
            slug,
            label,
            capacity,
            max_capacity,
        } => {
            let city = City {
                slug,
                label,
                capacity,
                max_capacity,
            };
            Response::ok(&engine.update_city(me, city).await?)
        }
        Command::DeleteCity { city } => {
            engine.delete_city(me, &city).await?;
            Response::ok(&serde_json::json!({ "deleted": city }))
        }
        Command::ListNotices { city, after, before } => {
            Response::ok(&engine.get_notices(&city, after.unwrap_or(today), before).await?)
        }
        Command::GetNotice { city, date } => Response::ok(&engine.get_notice(&city, date).await?),
        Command::PostNotice {
            city,
            date,
            message,
            temp_capacity,
        } => Response::ok(&engine.create_notice(me, &city, date, message, temp_capacity).await?),
        Command::DeleteNotice { city, date } => {
            let removed = engine.delete_notice(me, &city, date).await?;
            Response::ok(&serde_json::json!({ "removed": removed }))
        }
        Command::DayView { city, date } => Response::ok(&engine.day_view(me, &city, date).await?),
        Command::Calendar { city, from, weeks } => Response::ok(
            &engine
                .calendar(&city, from, weeks.unwrap_or(DEFAULT_WEEKS))
                .await?,
        ),
        Command::MyBookings { month } => {
            let month = month.unwrap_or(today);
            Response::ok(&serde_json::json!({
                "year": month.year(),
                "month": month.month(),
                "bookings": engine.get_my_bookings(me, month).await,
            }))
        }
        Command::Invite {
            city,
            date,
            period,
            guests,
        } => Response::ok(&engine.invite(caller, &city, date, period, guests).await?),
        Command::Book {
            city,
            date,
            period,
            for_user,
        } => {
            let target = BookingTarget {
                user_id: for_user.id,
                email: for_user.email,
                full_name: for_user.full_name,
            };
            Response::ok(&engine.book_for(caller, &city, date, period, target).await?)
        }
        Command::Remove { city, date, user_id } => {
            let removed = engine
                .remove_booking(caller, &city, date, user_id.unwrap_or(me))
                .await?;
            Response::ok(&serde_json::json!({ "removed": removed }))
        }
        Command::Me => Response::ok(&serde_json::json!({
            "profile": engine.get_profile_by_id(me),
            "admin": engine.get_admin_info(me).await,
        })),
        Command::UpdateMe { full_name, avatar_url } => {
            let update = ProfileUpdate {
                full_name,
                avatar_url: avatar_url.map(|url| Some(url).filter(|u| !u.is_empty())),
                favorite_city: None,
            };
            Response::ok(&engine.update_profile(me, update).await?)
        }
        Command::SetFavoriteCity { city } => {
            let update = ProfileUpdate {
                favorite_city: Some(city),
                ..ProfileUpdate::default()
            };
            Response::ok(&engine.update_profile(me, update).await?)
        }
        Command::FindProfile { email } => Response::ok(&engine.find_profile(&email)),
        Command::SearchProfiles { query } => Response::ok(&engine.search_profiles(&query)),
        Command::ListAdmins => Response::ok(&engine.get_all_admins().await),
        Command::AdminInfo { user_id } => Response::ok(&engine.get_admin_info(user_id.unwrap_or(me)).await),
        Command::GrantAdmin { user_id, role } => Response::ok(&engine.create_admin(me, user_id, role).await?),
        Command::UpdateAdmin { user_id, role } => Response::ok(&engine.update_admin(me, user_id, role).await?),
        Command::RevokeAdmin { user_id } => {
            engine.delete_admin(me, user_id).await?;
            Response::ok(&serde_json::json!({ "revoked": user_id }))
        }
    };
    Ok(response)
}
