use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::overlay;
use rollcall_hw::{Camera, CaptureSettings};
use rollcall_store::{CourseDraft, SqliteStore, Store, StudentListing};

/// Frames discarded before a snapshot so auto-exposure can settle.
const WARMUP_FRAMES: usize = 4;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// SQLite database shared with rollcalld
    #[arg(long, global = true, env = "ROLLCALL_DB_PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage courses
    Course {
        #[command(subcommand)]
        action: CourseAction,
    },
    /// Manage registered students
    Student {
        #[command(subcommand)]
        action: StudentAction,
    },
    /// Write a course's attendance as CSV
    Export {
        /// Course code
        #[arg(long)]
        course: String,
        /// One row per student with attendance rate instead of one row per record
        #[arg(long)]
        summary: bool,
        /// Output file (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Capture one frame to a JPEG file
    Snapshot {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, env = "ROLLCALL_CAMERA_DEVICE", default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = 90)]
        quality: u8,
    },
}

#[derive(Subcommand)]
enum CourseAction {
    /// Create a course
    Add {
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        instructor: String,
        /// Password professors use to open the course
        #[arg(long)]
        password: String,
        /// First lecture, YYYY-MM-DD
        #[arg(long)]
        start_date: String,
        /// Number of scheduled lectures
        #[arg(long)]
        lectures: u32,
        #[arg(long)]
        capacity: u32,
    },
    /// List courses
    List,
    /// Delete a course (its attendance records are kept)
    Remove { code: String },
}

#[derive(Subcommand)]
enum StudentAction {
    /// List registered students
    List,
    /// Delete a student (their attendance records are kept)
    Remove { student_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let db = cli.db.unwrap_or_else(default_db_path);

    match cli.command {
        Commands::Course { action } => course(&open_store(&db).await?, action).await,
        Commands::Student { action } => student(&open_store(&db).await?, action).await,
        Commands::Export {
            course,
            summary,
            out,
        } => export(&open_store(&db).await?, &course, summary, out.as_deref()).await,
        Commands::Devices => {
            devices();
            Ok(())
        }
        Commands::Snapshot {
            out,
            device,
            quality,
        } => snapshot(&device, &out, quality),
    }
}

fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("rollcall.db")
}

async fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path)
        .await
        .with_context(|| format!("opening database {}", path.display()))
}

async fn course(store: &dyn Store, action: CourseAction) -> Result<()> {
    match action {
        CourseAction::Add {
            code,
            name,
            instructor,
            password,
            start_date,
            lectures,
            capacity,
        } => {
            let course = CourseDraft {
                code,
                name,
                instructor,
                password,
                start_date,
                lecture_count: lectures,
                capacity,
            }
            .into_course()?;
            store.insert_course(course.clone()).await?;
            println!("Created course {} ({})", course.code, course.name);
        }
        CourseAction::List => {
            let courses = store.list_courses().await?;
            if courses.is_empty() {
                println!("No courses");
            }
            for c in courses {
                println!(
                    "{:<10} {:<30} {:<20} from {}  {} lectures  capacity {}",
                    c.code, c.name, c.instructor, c.start_date, c.lecture_count, c.capacity
                );
            }
        }
        CourseAction::Remove { code } => {
            if !store.delete_course(&code).await? {
                bail!("no course with code {code}");
            }
            println!("Removed course {code}");
        }
    }
    Ok(())
}

async fn student(store: &dyn Store, action: StudentAction) -> Result<()> {
    match action {
        StudentAction::List => {
            let students = store.list_students().await?;
            if students.is_empty() {
                println!("No students registered");
            }
            for s in students.iter().map(StudentListing::from) {
                println!(
                    "{:<12} {:<30} registered {}",
                    s.student_id,
                    s.name,
                    s.registered_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        StudentAction::Remove { student_id } => {
            if !store.delete_student(&student_id).await? {
                bail!("no student with id {student_id}");
            }
            println!("Removed student {student_id}");
        }
    }
    Ok(())
}

async fn export(store: &dyn Store, code: &str, summary: bool, out: Option<&Path>) -> Result<()> {
    let course = store
        .get_course(code)
        .await?
        .with_context(|| format!("no course with code {code}"))?;
    let records = store.course_attendance(code).await?;

    let writer: Box<dyn Write> = match out {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    if summary {
        rollcall_store::write_summary_csv(writer, &course, &records)?;
    } else {
        rollcall_store::write_records_csv(writer, &records)?;
    }

    if let Some(path) = out {
        eprintln!("Wrote {} records for {} to {}", records.len(), code, path.display());
    }
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in devices {
        println!("{}  {} (driver {}, bus {})", d.path, d.name, d.driver, d.bus);
    }
}

fn snapshot(device: &str, out: &Path, quality: u8) -> Result<()> {
    let mut camera = Camera::open(device, CaptureSettings::default())?;
    for _ in 0..WARMUP_FRAMES {
        let _ = camera.capture_frame();
    }
    let frame = camera.capture_frame()?;
    tracing::info!(
        width = frame.width,
        height = frame.height,
        brightness = frame.avg_brightness(),
        dark = frame.is_dark,
        "frame captured"
    );

    let image = overlay::annotate(frame.rgb, frame.width, frame.height, &[])?;
    let jpeg = overlay::encode_jpeg(&image, quality)?;
    std::fs::write(out, &jpeg).with_context(|| format!("writing {}", out.display()))?;
    println!("Wrote {}x{} snapshot to {}", frame.width, frame.height, out.display());
    Ok(())
}
