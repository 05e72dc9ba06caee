use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use spectacles_model::artifacts::{ArtifactPaths, DEFAULT_MODEL_PATH};
use spectacles_model::forest::ForestParams;
use spectacles_model::trainer::{self, TrainOptions};
use spectacles_model::{preprocess, FaceMetrics, Recommendation, Recommender};
use spectacles_vision::FaceAnalyzer;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "spectacles", version, about = "Face-to-frame eyewear recommender")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank catalog frames for a face
    Recommend {
        /// Face metrics as a flat JSON object
        #[arg(long, required_unless_present = "face_image", conflicts_with = "face_image")]
        face_json: Option<PathBuf>,
        /// Photo to extract face metrics from
        #[arg(long)]
        face_image: Option<PathBuf>,
        /// Trained regressor
        #[arg(long, default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
        /// Number of frames to return
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
        top_k: u32,
        /// Directory holding the preprocessing artifacts
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Directory holding the ONNX face models
        #[arg(long, default_value = "models")]
        onnx_dir: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Extract face metrics from a photo
    Analyze {
        image: PathBuf,
        #[arg(long, default_value = "models")]
        onnx_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Merge and encode the raw datasets into training artifacts
    Preprocess {
        /// Face/frame pair table with the target score
        #[arg(long)]
        pairs: PathBuf,
        /// Per-face enrichment table keyed by FaceID
        #[arg(long)]
        enrichment: PathBuf,
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Fit the random forest regressor on the processed dataset
    Train {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Output path for the trained regressor
        #[arg(long, default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u32).range(1..))]
        trees: u32,
        /// Maximum tree depth (0 = unlimited)
        #[arg(long, default_value_t = 15)]
        max_depth: u32,
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
        min_samples_leaf: u32,
        /// Share of rows held out for scoring
        #[arg(long, default_value_t = 0.2)]
        test_fraction: f64,
    },
}

#[derive(Serialize)]
struct RecommendOutput<'a> {
    metrics: &'a FaceMetrics,
    recommendations: &'a [Recommendation],
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    run(Cli::parse())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Recommend {
            face_json,
            face_image,
            model,
            top_k,
            data_dir,
            onnx_dir,
            json,
        } => {
            let metrics = match (face_json, face_image) {
                (Some(path), _) => read_face_json(&path)?,
                (None, Some(image)) => analyze(&image, &onnx_dir)?,
                (None, None) => bail!("either --face-json or --face-image is required"),
            };

            let recommender = Recommender::load(&ArtifactPaths::new(&data_dir), &model)
                .context("failed to load recommender artifacts")?;
            let ranked = recommender
                .recommend(&metrics, top_k as usize)
                .context("failed to score frames")?;

            if json {
                let out = RecommendOutput {
                    metrics: &metrics,
                    recommendations: &ranked,
                };
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_metrics(&metrics);
                println!();
                print_ranking(&ranked);
            }
        }
        Commands::Analyze {
            image,
            onnx_dir,
            json,
        } => {
            let metrics = analyze(&image, &onnx_dir)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                print_metrics(&metrics);
            }
        }
        Commands::Preprocess {
            pairs,
            enrichment,
            data_dir,
        } => {
            let paths = ArtifactPaths::new(&data_dir);
            let summary = preprocess::run(&pairs, &enrichment, &paths)
                .context("preprocessing failed")?;
            println!("Processed {} rows ({} dropped)", summary.rows, summary.dropped);
            println!("  features: {}", summary.features);
            println!("  frames:   {}", summary.frames);
            if !summary.has_target {
                println!("  warning: no target column; the dataset cannot be trained on");
            }
            println!("Artifacts written to {}", data_dir.display());
        }
        Commands::Train {
            data_dir,
            model,
            seed,
            trees,
            max_depth,
            min_samples_leaf,
            test_fraction,
        } => {
            let options = TrainOptions {
                forest: ForestParams {
                    n_estimators: trees as usize,
                    max_depth: (max_depth > 0).then_some(max_depth as usize),
                    min_samples_leaf: min_samples_leaf as usize,
                    seed,
                    ..ForestParams::default()
                },
                test_fraction,
            };
            let report = trainer::train(&ArtifactPaths::new(&data_dir), &options)
                .context("training failed")?;
            report
                .model
                .save(&model)
                .with_context(|| format!("failed to save model to {}", model.display()))?;

            println!(
                "Trained {} trees on {} rows ({} held out)",
                options.forest.n_estimators, report.train_rows, report.test_rows
            );
            println!("  test R^2:              {:.4}", report.test_r2);
            println!("  face feature importance: {:.1}%", report.face_importance * 100.0);
            println!("Model saved to {}", model.display());
        }
    }

    Ok(())
}

fn read_face_json(path: &Path) -> Result<FaceMetrics> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read face metrics from {}", path.display()))?;
    let metrics: FaceMetrics = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a flat JSON object of numbers", path.display()))?;
    tracing::debug!(path = %path.display(), metrics = metrics.len(), "face metrics loaded");
    Ok(metrics)
}

fn analyze(image: &Path, onnx_dir: &Path) -> Result<FaceMetrics> {
    let mut analyzer = FaceAnalyzer::load(onnx_dir).context("failed to load face models")?;
    analyzer
        .analyze_path(image)
        .with_context(|| format!("face analysis failed for {}", image.display()))
}

fn print_metrics(metrics: &FaceMetrics) {
    println!("Face metrics:");
    for (name, value) in metrics.iter() {
        println!("  {name:<22} {value:.4}");
    }
}

fn print_ranking(ranked: &[Recommendation]) {
    println!("Top {} frames:", ranked.len());
    println!(
        "  {:>3}  {:<12} {:<12} {:<10} {:>8}  {:>8}",
        "#", "FrameID", "Brand", "Material", "Width_mm", "Score"
    );
    for rec in ranked {
        let frame = &rec.frame;
        println!(
            "  {:>3}  {:<12} {:<12} {:<10} {:>8.1}  {:>8.4}",
            rec.rank,
            frame.frame_id,
            frame.brand.as_deref().unwrap_or("-"),
            frame.material.as_deref().unwrap_or("-"),
            frame.width_mm,
            rec.score
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectacles_model::recommender::RecommendError;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("spectacles").chain(args.iter().copied()))
    }

    #[test]
    fn test_recommend_args() {
        let cli = parse(&[
            "recommend",
            "--face-json",
            "face.json",
            "--model",
            "m.bin",
            "--top-k",
            "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Recommend {
                face_json,
                face_image,
                model,
                top_k,
                data_dir,
                json,
                ..
            } => {
                assert_eq!(face_json, Some(PathBuf::from("face.json")));
                assert_eq!(face_image, None);
                assert_eq!(model, PathBuf::from("m.bin"));
                assert_eq!(top_k, 3);
                assert_eq!(data_dir, PathBuf::from("data"));
                assert!(!json);
            }
            _ => panic!("expected recommend"),
        }
    }

    #[test]
    fn test_recommend_rejects_zero_top_k() {
        assert!(parse(&["recommend", "--face-json", "face.json", "--top-k", "0"]).is_err());
    }

    #[test]
    fn test_recommend_needs_exactly_one_face_source() {
        assert!(parse(&["recommend", "--model", "m.bin"]).is_err());
        assert!(parse(&["recommend", "--face-json", "f.json", "--face-image", "f.png"]).is_err());
        assert!(parse(&["recommend", "--face-image", "f.png"]).is_ok());
    }

    #[test]
    fn test_train_defaults() {
        match parse(&["train"]).unwrap().command {
            Commands::Train {
                seed,
                trees,
                max_depth,
                min_samples_leaf,
                test_fraction,
                ..
            } => {
                assert_eq!((seed, trees, max_depth, min_samples_leaf), (42, 200, 15, 5));
                assert_eq!(test_fraction, 0.2);
            }
            _ => panic!("expected train"),
        }
    }

    #[test]
    fn test_read_face_json() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"EyeSpacingRatio": 0.46, "FacialSymmetry": 0.01}"#).unwrap();
        let metrics = read_face_json(&good).unwrap();
        assert_eq!(metrics.get("EyeSpacingRatio"), Some(0.46));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"EyeSpacingRatio": "wide"}"#).unwrap();
        assert!(read_face_json(&bad).is_err());

        let nested = dir.path().join("nested.json");
        std::fs::write(&nested, r#"[{"EyeSpacingRatio": 0.46}]"#).unwrap();
        assert!(read_face_json(&nested).is_err());

        assert!(read_face_json(&dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn test_recommend_fails_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let face = dir.path().join("face.json");
        std::fs::write(&face, r#"{"EyeSpacingRatio": 0.46}"#).unwrap();
        let face = face.to_string_lossy().into_owned();
        let model = dir.path().join("missing.bin").to_string_lossy().into_owned();
        let data_dir = dir.path().to_string_lossy().into_owned();

        let cli = parse(&[
            "recommend",
            "--face-json",
            face.as_str(),
            "--model",
            model.as_str(),
            "--data-dir",
            data_dir.as_str(),
        ])
        .unwrap();
        let err = run(cli).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecommendError>(),
            Some(RecommendError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_preprocess_fails_on_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let pairs = dir.path().join("pairs.csv").to_string_lossy().into_owned();
        let enrichment = dir.path().join("enrich.csv").to_string_lossy().into_owned();
        let out = dir.path().join("out").to_string_lossy().into_owned();
        let cli = parse(&[
            "preprocess",
            "--pairs",
            pairs.as_str(),
            "--enrichment",
            enrichment.as_str(),
            "--data-dir",
            out.as_str(),
        ])
        .unwrap();
        assert!(run(cli).is_err());
    }
}
