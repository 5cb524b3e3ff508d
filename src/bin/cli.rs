//! CLI application for face detection and eye landmark refinement.
//!
//! Usage:
//!   face-cascade <image> --config pipeline.toml     # Human-readable output
//!   face-cascade <image> --config pipeline.toml --json
//!   face-cascade <image> --face-regressor face.bin --eye-regressor eye.bin -o faces.json

use std::path::PathBuf;

use clap::Parser;
use face_cascade::archive::{write_faces, JsonArchive};
use face_cascade::{
    Config, EyeModel, FaceDetector, FaceModel, GrayImage, Homography, PaddedImage, Resources,
};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "face-cascade")]
#[command(
    author,
    version,
    about = "Face detection with eye and iris refinement",
    long_about = None
)]
struct Args {
    /// Input image file
    #[arg(required = true)]
    image: PathBuf,

    /// Pipeline configuration (TOML); overrides the model path options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(short, long)]
    json: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Face detector model path
    #[arg(long, default_value = "seeta_fd_frontal_v1.0.bin")]
    detector: PathBuf,

    /// Face landmark regressor path; repeat to chain coarse-to-fine
    #[arg(long = "face-regressor")]
    face_regressors: Vec<PathBuf>,

    /// Eye landmark regressor path
    #[arg(long, default_value = "eye_regressor.bin")]
    eye_regressor: PathBuf,

    /// Minimum face size for detection
    #[arg(long)]
    min_face_size: Option<u32>,

    /// Skip eyelid and iris refinement
    #[arg(long)]
    no_eyes: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => {
            if args.face_regressors.is_empty() {
                return Err("at least one --face-regressor or a --config is required".into());
            }
            Config::new(Resources {
                face_detector: args.detector.clone(),
                face_regressors: args.face_regressors.clone(),
                eye_regressor: args.eye_regressor.clone(),
            })
        }
    };
    if let Some(size) = args.min_face_size {
        config.hints.min_face_size = size;
    }
    if args.no_eyes {
        config.hints.do_eye_refinement = false;
    }
    Ok(config)
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args)?;
    let mut pipeline = FaceDetector::from_config(&config)?;

    info!("Loading image {:?}", args.image);
    let img = image::open(&args.image)?.to_luma8();
    let (width, height) = img.dimensions();
    let gray = GrayImage::new(img.into_raw(), width, height);

    let mut faces = pipeline.detect(&gray);
    info!("Found {} face(s)", faces.len());

    let padded = PaddedImage::unpadded(gray);
    let report = pipeline.refine(&padded, &mut faces, &Homography::identity(), true);
    for warning in &report.warnings {
        info!("{:?}", warning);
    }

    let output_str = if args.json {
        String::from_utf8(write_faces(&JsonArchive, &faces)?)?
    } else {
        format_human_readable(&args.image, width, height, &faces)
    };

    if let Some(ref path) = args.output {
        std::fs::write(path, &output_str)?;
        info!("Output written to {:?}", path);
    } else {
        println!("{}", output_str);
    }

    Ok(())
}

fn format_eye(label: &str, eye: Option<&EyeModel>) -> String {
    let Some(eye) = eye else {
        return format!("  {}: not refined\n", label);
    };
    let mut s = format!("  {}: openness {:.3}", label, eye.openness());
    if let Some(c) = eye.iris_center.get() {
        s.push_str(&format!(", iris ({:.1}, {:.1}) r={:.1}", c.x, c.y, eye.iris.radius));
    }
    s.push('\n');
    s
}

fn format_human_readable(
    image: &std::path::Path,
    width: u32,
    height: u32,
    faces: &[FaceModel],
) -> String {
    let mut s = String::new();

    s.push_str(&format!("Image: {} ({}x{})\n", image.display(), width, height));
    s.push_str(&format!("Faces refined: {}\n", faces.len()));

    if faces.is_empty() {
        s.push_str("\nNo faces found.\n");
        return s;
    }

    for (i, face) in faces.iter().enumerate() {
        s.push_str(&format!("\n--- Face {} ---\n", i + 1));
        if let Some(roi) = face.roi.get() {
            s.push_str(&format!(
                "Bounding box: {:.0}x{:.0} at ({:.0}, {:.0})\n",
                roi.width, roi.height, roi.x, roi.y
            ));
        }
        if let Some(score) = face.score.get() {
            s.push_str(&format!("Score: {:.2}\n", score));
        }
        s.push_str(&format!("Landmarks: {} points\n", face.points.num_landmarks()));
        if let Some(d) = face.inter_ocular_distance() {
            s.push_str(&format!("Inter-ocular distance: {:.1}px\n", d));
        }
        s.push_str("\nEyes:\n");
        s.push_str(&format_eye("Left", face.eye_left.get()));
        s.push_str(&format_eye("Right", face.eye_right.get()));
    }

    s
}
