use std::env;
use std::path::PathBuf;

use window_feature_match::feature_match::{
    FeatureDetector, MatchTuning, ProfileRegistry, TemplateStore, rank_matches,
};

/// Offline checker: match an exported template library against a saved frame.
fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut templates_path: Option<PathBuf> = None;
    let mut frame_path: Option<PathBuf> = None;
    let mut profile_name = "standard".to_string();

    for arg in args.iter().skip(1) {
        if arg == "--help" || arg == "-h" {
            print_help();
            return;
        } else if arg == "--version" || arg == "-v" {
            println!("window-feature-match v{}", env!("CARGO_PKG_VERSION"));
            return;
        } else if arg == "--list-profiles" {
            let registry = ProfileRegistry::new();
            for name in registry.names() {
                let profile = registry.select(name).expect("catalog name");
                println!("{name}: {}", profile.description);
            }
            return;
        } else if let Some(rest) = arg.strip_prefix("--templates=") {
            templates_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = arg.strip_prefix("--frame=") {
            frame_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = arg.strip_prefix("--profile=") {
            profile_name = rest.to_string();
        } else {
            eprintln!("❌ Unknown argument: {arg}");
            print_help();
            return;
        }
    }

    let (Some(templates_path), Some(frame_path)) = (templates_path, frame_path) else {
        eprintln!("❌ Both --templates=FILE and --frame=IMAGE are required");
        print_help();
        return;
    };

    let registry = ProfileRegistry::new();
    let Some(profile) = registry.select(&profile_name) else {
        eprintln!(
            "❌ Unknown profile '{profile_name}', available: {}",
            registry.names().join(", ")
        );
        return;
    };
    let detector = FeatureDetector::new(profile.clone());

    let mut store = TemplateStore::new();
    match store.import(&templates_path) {
        Ok(count) => println!("📦 Loaded {count} templates from {}", templates_path.display()),
        Err(e) => {
            eprintln!("❌ Failed to load templates: {e}");
            return;
        }
    }

    let frame = match image::open(&frame_path) {
        Ok(img) => img.to_luma8(),
        Err(e) => {
            eprintln!("❌ Failed to load frame {}: {e}", frame_path.display());
            return;
        }
    };

    let (frame_keypoints, frame_descriptors) = match detector.detect(&frame, None) {
        Ok(detection) => detection,
        Err(e) => {
            eprintln!("❌ Frame detection failed: {e}");
            return;
        }
    };

    let results = rank_matches(
        &store.snapshot(),
        &frame_keypoints,
        frame_descriptors.as_ref(),
        &MatchTuning::default(),
    );

    if results.is_empty() {
        println!("No templates matched the frame");
        return;
    }
    println!("Match results:");
    for result in results {
        println!(
            "✅ {}: confidence {:.3} ({} good matches)",
            result.template_name, result.confidence, result.good_match_count
        );
    }
}

fn print_help() {
    println!("🔍 Window Feature Match — offline template checker");
    println!();
    println!("USAGE:");
    println!("    window-feature-match --templates=FILE --frame=IMAGE [--profile=NAME]");
    println!();
    println!("FLAGS:");
    println!("    --templates=FILE    Portable template library (JSON export)");
    println!("    --frame=IMAGE       Frame to match against (PNG/JPEG)");
    println!("    --profile=NAME      Detector profile (default: standard)");
    println!("    --list-profiles     List built-in detector profiles");
    println!("    --help, -h          Show this help message");
    println!("    --version, -v       Show version information");
    println!();
    println!("EXAMPLES:");
    println!("    window-feature-match --templates=templates.json --frame=frame.png");
    println!("    window-feature-match --list-profiles");
}
