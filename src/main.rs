use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog_client::http::{Notice, NoticeLevel, Notifier};
use catalog_client::listing::{filter_courses, filter_instances};
use catalog_client::models::{AcademicPeriod, Course, InstanceId, NewInstanceRequest, validate_semester};
use catalog_client::{AppError, ClientConfig, ClientContext, InstanceFilter};

#[derive(Parser)]
#[command(name = "catalog", about = "Course catalog administration client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage courses
    #[command(subcommand)]
    Courses(CourseCommand),
    /// Manage course instances
    #[command(subcommand)]
    Instances(InstanceCommand),
    /// Store a bearer token for subsequent requests
    Login { token: String },
    /// Forget the stored token
    Logout,
    /// Course and instance totals for the current period
    Dashboard,
}

#[derive(Subcommand)]
enum CourseCommand {
    List {
        #[arg(long)]
        search: Option<String>,
    },
    Show {
        course_id: String,
    },
    Create(CourseArgs),
    Update {
        course_id: String,
        #[command(flatten)]
        course: CourseArgs,
    },
    Delete {
        course_id: String,
    },
}

#[derive(Args)]
struct CourseArgs {
    #[arg(long = "id")]
    course_id: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long = "prereq")]
    prerequisite_ids: Vec<String>,
}

impl From<CourseArgs> for Course {
    fn from(args: CourseArgs) -> Self {
        Course {
            course_id: args.course_id,
            title: args.title,
            description: args.description,
            prerequisite_ids: args.prerequisite_ids,
        }
    }
}

#[derive(Subcommand)]
enum InstanceCommand {
    List {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        semester: Option<u8>,
        #[arg(long)]
        search: Option<String>,
    },
    Show(InstanceArgs),
    Create(InstanceArgs),
    Delete(InstanceArgs),
}

#[derive(Args)]
struct InstanceArgs {
    year: i32,
    semester: u8,
    course_id: String,
}

impl InstanceArgs {
    fn id(&self) -> Result<InstanceId, AppError> {
        let semester = validate_semester(self.semester)?;
        Ok(InstanceId::new(self.year, semester, self.course_id.clone()))
    }
}

/// Prints notices on stderr, where a browser client would show a toast.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => eprintln!("error: {}", notice.message),
            NoticeLevel::Info | NoticeLevel::Success => eprintln!("{}", notice.message),
        }
    }

    fn session_expired(&self) {
        eprintln!("run `catalog login <token>` to sign in again");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "catalog_client=info,catalog=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::new_from_env()?;
    let ctx = ClientContext::init_persistent(config, Arc::new(ConsoleNotifier)).await?;
    let catalog = &ctx.catalog;

    match cli.command {
        Command::Login { token } => {
            ctx.login(&token).await?;
            eprintln!("token stored");
        }
        Command::Logout => {
            ctx.logout().await?;
            eprintln!("token cleared");
        }
        Command::Dashboard => {
            let stats = catalog.dashboard(AcademicPeriod::current()).await?;
            print_json(&stats)?;
        }
        Command::Courses(cmd) => match cmd {
            CourseCommand::List { search } => {
                let courses = catalog.fetch_courses().await?;
                let shown = filter_courses(&courses, search.as_deref().unwrap_or(""));
                print_json(&shown)?;
            }
            CourseCommand::Show { course_id } => {
                print_json(&*catalog.fetch_course(&course_id).await?)?;
            }
            CourseCommand::Create(args) => {
                print_json(&catalog.create_course(args.into()).await?)?;
            }
            CourseCommand::Update { course_id, course } => {
                print_json(&catalog.update_course(&course_id, course.into()).await?)?;
            }
            CourseCommand::Delete { course_id } => {
                catalog.delete_course(&course_id).await?;
            }
        },
        Command::Instances(cmd) => match cmd {
            InstanceCommand::List {
                year,
                semester,
                search,
            } => {
                let semester = semester
                    .map(validate_semester)
                    .transpose()
                    .map_err(AppError::from)?;
                let filter = InstanceFilter {
                    year,
                    semester,
                    search: search.clone(),
                };
                let instances = match (filter.year, filter.semester) {
                    (Some(year), Some(semester)) => {
                        catalog
                            .fetch_instances(AcademicPeriod::new(year, semester))
                            .await?
                    }
                    _ => catalog.fetch_all_instances().await?,
                };
                let shown: Vec<_> = filter_instances(&instances, search.as_deref().unwrap_or(""))
                    .into_iter()
                    .filter(|i| filter.year.is_none_or(|y| i.year == y))
                    .filter(|i| filter.semester.is_none_or(|s| i.semester == s))
                    .collect();
                print_json(&shown)?;
            }
            InstanceCommand::Show(args) => {
                print_json(&*catalog.fetch_instance(&args.id()?).await?)?;
            }
            InstanceCommand::Create(args) => {
                let req = NewInstanceRequest::new(args.course_id, args.year, args.semester);
                print_json(&catalog.create_instance(req).await?)?;
            }
            InstanceCommand::Delete(args) => {
                catalog.delete_instance(&args.id()?).await?;
            }
        },
    }

    Ok(())
}
