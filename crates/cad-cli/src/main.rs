use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use cad_ai::{BoundingBox, CorrectionContext, OpenAiClient, RetrievalIndex, extract_code};
use cad_mesh::{MeshExporter, StlFormat};
use cad_server::config::ServerConfig;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cad", version, about = "Text-to-STL generator tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the bounding box a prompt asks for.
    Dims { prompt: String },
    /// Print the code inside a raw model response.
    Extract { file: PathBuf },
    /// Run a script in the sandbox and export its scene as STL.
    Run {
        file: PathBuf,
        #[arg(long, default_value = "models")]
        out: PathBuf,
        /// Write binary instead of ASCII STL.
        #[arg(long)]
        binary: bool,
    },
    /// Generate a model from a prompt against the configured endpoint.
    Generate {
        prompt: String,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Code to modify; the prompt then describes the change.
        #[arg(long)]
        previous: Option<PathBuf>,
    },
    /// Compute and store missing embeddings of an example corpus.
    EmbedCorpus {
        corpus: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Dims { prompt } => println!("{}", describe_prompt(&prompt)),
        Command::Extract { file } => println!("{}", extract_code(&read(&file)?)),
        Command::Run { file, out, binary } => {
            let saved = run_script(&read(&file)?, &out, binary)?;
            println!("{}", saved.display());
        }
        Command::Generate {
            prompt,
            config,
            previous,
        } => {
            let context = previous
                .map(|path| read(&path).map(CorrectionContext::new))
                .transpose()?;
            let config = load_config(config)?;
            runtime()?.block_on(generate(&config, &prompt, context))?;
        }
        Command::EmbedCorpus { corpus, config } => {
            let config = load_config(config)?;
            runtime()?.block_on(embed_corpus(&config, &corpus))?;
        }
    }
    Ok(())
}

fn read(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ServerConfig> {
    let path = path.or_else(|| std::env::var_os("CAD_CONFIG").map(PathBuf::from));
    let mut config = ServerConfig::load(path.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

fn describe_prompt(prompt: &str) -> String {
    let bounds = BoundingBox::from_prompt(prompt);
    format!(
        "{} x {} x {} mm\n{}",
        bounds.x,
        bounds.y,
        bounds.z,
        bounds.describe()
    )
}

fn run_script(code: &str, out: &Path, binary: bool) -> anyhow::Result<PathBuf> {
    let scene = cad_script::run(code)?;
    let format = if binary {
        StlFormat::Binary
    } else {
        StlFormat::Ascii
    };
    let exporter = MeshExporter::new(out).with_format(format);
    let file_name = exporter.export(&scene)?;
    info!(kind = scene.kind(), meshes = scene.mesh_count(), "scene exported");
    Ok(exporter.dir().join(file_name))
}

async fn generate(
    config: &ServerConfig,
    prompt: &str,
    context: Option<CorrectionContext>,
) -> anyhow::Result<()> {
    let pipeline = cad_server::build_pipeline(config)?;
    let outcome = pipeline.generate(prompt, context).await?;
    if !outcome.fits_bounding_box {
        info!(extent = ?outcome.scene_extent, "model exceeds the requested size");
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn embed_corpus(config: &ServerConfig, corpus: &Path) -> anyhow::Result<()> {
    let client = OpenAiClient::new(config.openai_config()?)?;
    let index = RetrievalIndex::load(corpus, client)?;
    if index.is_empty().await {
        bail!("{} contains no examples", corpus.display());
    }
    let computed = index.ensure_embeddings().await?;
    if computed > 0 {
        index.save().await?;
    }
    println!("{computed} of {} embeddings computed", index.len().await);
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command, describe_prompt, run_script};

    #[test]
    fn describes_prompt_dimensions() {
        let text = describe_prompt("a plate 80mm by 40 mm, 5mm thick");
        assert!(text.starts_with("80 x 40 x 5 mm"));
        assert!(text.contains("[80, 40, 5]"));
    }

    #[test]
    fn exports_ascii_and_binary() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let code = "const mesh = new Mesh(new BoxGeometry(10, 10, 10));";

        let ascii = run_script(code, dir.path(), false).expect("script should export");
        let text = std::fs::read_to_string(&ascii).unwrap();
        assert!(text.starts_with("solid"));
        assert_eq!(text.matches("endfacet").count(), 12);

        let binary = run_script(code, dir.path(), true).expect("script should export");
        let bytes = std::fs::read(&binary).unwrap();
        assert_eq!(bytes.len(), 84 + 12 * 50);
        assert_ne!(ascii, binary);
    }

    #[test]
    fn script_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let error = run_script("const mesh = 1;", dir.path(), false).unwrap_err();
        assert!(error.to_string().contains("'mesh'"));
        assert!(!dir.path().read_dir().unwrap().any(|_| true));
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::parse_from(["cad", "run", "cube.js", "--out", "stl", "--binary"]);
        match cli.command {
            Command::Run { file, out, binary } => {
                assert_eq!(file.to_str(), Some("cube.js"));
                assert_eq!(out.to_str(), Some("stl"));
                assert!(binary);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_generate_with_previous_code() {
        let cli = Cli::parse_from(["cad", "generate", "make it taller", "--previous", "a.js"]);
        assert!(matches!(
            cli.command,
            Command::Generate { previous: Some(_), config: None, .. }
        ));
    }
}
