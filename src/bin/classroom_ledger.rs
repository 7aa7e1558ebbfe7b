//! classroom-ledger: standalone classroom host
//!
//! Opens the configured store, signs in the configured teacher, provisions
//! the classroom and logs the live roster until Ctrl-C. Account uids are
//! derived from the email, so a persistent store keeps addressing the same
//! teacher across restarts.
//!
//! ## Configuration
//! - First argument: path to a YAML config file (optional)
//! - CLASSROOM_CONFIG: config file path (optional)
//! - CLASSROOM__*: per-key overrides, e.g. `CLASSROOM__STORAGE__TYPE=sqlite`
//! - CLASSROOM_LOG: tracing filter (default: info)
//! - CLASSROOM_TEACHER_PASSWORD: teacher account password; a random one is
//!   generated when unset

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use classroom_ledger::auth::{AuthService, MemoryIdentityProvider, RoleResolver};
use classroom_ledger::config::Config;
use classroom_ledger::model::ClassroomId;
use classroom_ledger::portal::TeacherPortal;
use classroom_ledger::services::Services;
use classroom_ledger::storage::init_storage;
use classroom_ledger::utils::bootstrap::init_tracing;

const TEACHER_PASSWORD_ENV: &str = "CLASSROOM_TEACHER_PASSWORD";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    info!(
        storage = %config.storage.storage_type,
        classroom = %config.classroom.id,
        "Configuration loaded"
    );

    let store = init_storage(&config.storage).await?;

    let auth = AuthService::new(
        Arc::new(MemoryIdentityProvider::new(config.auth.min_password_length)),
        RoleResolver::from_config(&config.auth),
        ClassroomId::new(&config.classroom.id),
    );
    let teacher_email = config
        .auth
        .teacher_emails
        .first()
        .ok_or("no teacher email configured")?;
    let password = match std::env::var(TEACHER_PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => {
            warn!("{} not set, using a generated password", TEACHER_PASSWORD_ENV);
            Uuid::new_v4().simple().to_string()
        }
    };
    let claims = auth.create_account(teacher_email, &password).await?;

    let services = Services::new(store, config.limits.clone());
    let classroom = services
        .classrooms
        .provision(&claims, &config.classroom.name)
        .await?;
    info!(classroom = %classroom.name, teacher = %claims.email, "Classroom ready");

    let portal = TeacherPortal::open(claims, services).await?;
    let mut roster = portal.watch_roster()?;

    loop {
        tokio::select! {
            snapshot = roster.next() => match snapshot {
                Some(Ok(students)) => {
                    info!(students = students.len(), "Roster updated");
                    for student in &students {
                        debug!(
                            id = %student.id,
                            name = %student.name,
                            xp = student.xp,
                            level = student.level(),
                            money = %student.money,
                            black_marks = student.black_marks.len(),
                            "Student"
                        );
                    }
                }
                Some(Err(e)) => warn!(error = %e, "Roster refresh failed"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    roster.close();
    drop(portal);
    auth.sign_out().await?;
    Ok(())
}
