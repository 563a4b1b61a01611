use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use lecture_attendance::api::{self, AppState};
use lecture_attendance::catalog::Catalog;
use lecture_attendance::cli::{Cli, Command};
use lecture_attendance::config::Settings;
use lecture_attendance::manager::AttendanceManager;
use lecture_attendance::models::{parse_date, validate_course_code};
use lecture_attendance::{db, display, reconcile};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => api::serve(&settings).await?,
        Command::InitDb => {
            db::establish(&settings.database.url)
                .with_context(|| format!("failed to initialize {}", settings.database.url))?;
            println!("Ledger ready at {}", settings.database.url);
        }
        Command::Report { user, course } => {
            let course = course.as_deref().map(validate_course_code).transpose()?;

            let mut conn = db::establish(&settings.database.url)?;
            let mut manager = AttendanceManager::new(&mut conn);
            let caller = manager.get_user(&user)?;
            let reports = manager.report(&caller, course.as_deref())?;

            display::show_report(&caller.id, &reports);
        }
        Command::Schedule { user, date } => {
            let date = match date.as_deref() {
                Some(raw) => parse_date(raw)?,
                None => Local::now().date_naive(),
            };

            let state = AppState::from_settings(&settings)?;
            let caller = db::with_manager(&state.pool, move |manager| manager.get_user(&user))
                .await?;
            let lectures =
                reconcile::reconcile_day(state.timetable.as_ref(), &state.pool, &caller, date)
                    .await?;

            display::show_schedule(date, &lectures);
        }
        Command::Catalog { branch, semester } => {
            let catalog = Catalog::from_path(&settings.catalog.path)
                .with_context(|| format!("failed to read {}", settings.catalog.path))?;

            match (branch.as_deref(), semester) {
                (Some(branch), Some(semester)) => {
                    display::show_catalog(&catalog, Some((branch, semester)))
                }
                _ => display::show_catalog(&catalog, None),
            }
        }
    }

    Ok(())
}
