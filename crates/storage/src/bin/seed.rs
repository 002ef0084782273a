use std::fmt;

use chrono::{DateTime, Utc};
use course_core::model::{CourseId, Lesson, LessonId, UserId};
use course_storage::repository::{EnrollmentRow, Storage};
use url::Url;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    course_id: CourseId,
    lessons: u32,
    lesson_minutes: u32,
    enroll_user: Option<UserId>,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidCourseId { raw: String },
    InvalidLessons { raw: String },
    InvalidMinutes { raw: String },
    InvalidUser { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidCourseId { raw } => write!(f, "invalid --course-id value: {raw}"),
            ArgsError::InvalidLessons { raw } => write!(f, "invalid --lessons value: {raw}"),
            ArgsError::InvalidMinutes { raw } => {
                write!(f, "invalid --lesson-minutes value: {raw}")
            }
            ArgsError::InvalidUser { raw } => {
                write!(f, "invalid --enroll value (expected UUID): {raw}")
            }
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("COURSE_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3".into());
        let mut course_id = std::env::var("COURSE_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| CourseId::new(1), CourseId::new);
        let mut lessons = std::env::var("COURSE_LESSONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(5);
        let mut lesson_minutes = 10;
        let mut enroll_user: Option<UserId> = None;
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--course-id" => {
                    let value = require_value(&mut args, "--course-id")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidCourseId { raw: value.clone() })?;
                    course_id = CourseId::new(parsed);
                }
                "--lessons" => {
                    let value = require_value(&mut args, "--lessons")?;
                    lessons = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidLessons { raw: value.clone() })?;
                }
                "--lesson-minutes" => {
                    let value = require_value(&mut args, "--lesson-minutes")?;
                    lesson_minutes = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidMinutes { raw: value.clone() })?;
                }
                "--enroll" => {
                    let value = require_value(&mut args, "--enroll")?;
                    let parsed = value
                        .parse::<UserId>()
                        .map_err(|_| ArgsError::InvalidUser { raw: value.clone() })?;
                    enroll_user = Some(parsed);
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            course_id,
            lessons,
            lesson_minutes,
            enroll_user,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p course-storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3)");
    eprintln!("  --course-id <id>          Course id to seed (default: 1)");
    eprintln!("  --lessons <n>             Number of lessons to upsert (default: 5)");
    eprintln!("  --lesson-minutes <n>      Duration of each lesson in minutes (default: 10)");
    eprintln!("  --enroll <uuid>           Also enroll this user in the course");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  COURSE_DB_URL, COURSE_ID, COURSE_LESSONS");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let base = Url::parse("https://videos.example.com/")?;
    for i in 0..args.lessons {
        let lesson_id = LessonId::new(u64::from(i) + 1);
        let video_url = base.join(&format!(
            "courses/{}/lessons/{lesson_id}.mp4",
            args.course_id
        ))?;
        let lesson = Lesson::new(
            lesson_id,
            args.course_id,
            i,
            format!("Lesson {}", i + 1),
            f64::from(args.lesson_minutes) * 60.0,
            video_url,
        )?;
        storage.catalog.upsert_lesson(&lesson).await?;
    }

    if let Some(user_id) = args.enroll_user {
        storage
            .enrollments
            .enroll(&EnrollmentRow {
                user_id,
                course_id: args.course_id,
                enrolled_at: now,
                completed_at: None,
            })
            .await?;
    }

    println!(
        "Seeded course {} with {} lessons into {}",
        args.course_id.value(),
        args.lessons,
        args.db_url
    );
    if let Some(user_id) = args.enroll_user {
        println!("Enrolled user {user_id}");
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
