//! lockstep - convert between yarn.lock and package-lock.json

use anyhow::{bail, Context, Result};
use clap::Parser;
use lockstep_core::{npm_to_yarn, yarn_to_npm, HttpRegistry, Manifest, PackageLock};
use std::path::{Path, PathBuf};

mod yarn_text;

#[derive(Parser)]
#[command(name = "lockstep")]
#[command(version)]
#[command(about = "Convert yarn.lock to package-lock.json and back", long_about = None)]
struct Cli {
    /// Lock file to convert (a yarn.lock or a package-lock.json); the
    /// project's package.json must sit next to it
    #[arg(short, long)]
    source_file: PathBuf,

    /// Write the converted lock here instead of next to the source
    #[arg(short, long, conflicts_with = "stdout")]
    output: Option<PathBuf>,

    /// Print the converted lock to stdout instead of writing a file
    #[arg(long)]
    stdout: bool,

    /// Registry used to fill in missing resolved/integrity fields
    #[arg(long, default_value = HttpRegistry::DEFAULT_BASE)]
    registry: String,
}

/// The conversion direction, picked from the source file's name.
enum Direction {
    YarnToNpm,
    NpmToYarn,
}

impl Direction {
    fn from_source(path: &Path) -> Result<Self> {
        match path.file_name().and_then(|n| n.to_str()) {
            Some("yarn.lock") => Ok(Self::YarnToNpm),
            Some("package-lock.json") => Ok(Self::NpmToYarn),
            _ => bail!(
                "unrecognized lock file '{}': expected yarn.lock or package-lock.json",
                path.display()
            ),
        }
    }

    fn output_name(&self) -> &'static str {
        match self {
            Self::YarnToNpm => "package-lock.json",
            Self::NpmToYarn => "yarn.lock",
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let direction = Direction::from_source(&cli.source_file)?;

    let dir = cli.source_file.parent().unwrap_or_else(|| Path::new("."));
    let manifest = Manifest::from_path(&dir.join("package.json"))?;
    let registry = HttpRegistry::new(&cli.registry);

    let rendered = convert(&cli.source_file, &direction, &manifest, &registry)?;

    if cli.stdout {
        print!("{rendered}");
        return Ok(());
    }

    let target = cli
        .output
        .unwrap_or_else(|| dir.join(direction.output_name()));
    std::fs::write(&target, rendered)
        .with_context(|| format!("failed to write '{}'", target.display()))?;
    println!("Written: {}", target.display());

    Ok(())
}

fn convert(
    source: &Path,
    direction: &Direction,
    manifest: &Manifest,
    registry: &HttpRegistry,
) -> Result<String> {
    let text = std::fs::read_to_string(source)
        .with_context(|| format!("failed to read '{}'", source.display()))?;

    match direction {
        Direction::YarnToNpm => {
            let lock = yarn_text::parse(&text)
                .with_context(|| format!("failed to parse '{}'", source.display()))?;
            let out = yarn_to_npm(&lock, manifest, registry)?;
            let mut json = serde_json::to_string_pretty(&out)?;
            json.push('\n');
            Ok(json)
        }
        Direction::NpmToYarn => {
            let lock: PackageLock = serde_json::from_str(&text)
                .with_context(|| format!("failed to parse '{}'", source.display()))?;
            let out = npm_to_yarn(&lock, manifest, registry)?;
            Ok(yarn_text::stringify(&out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn direction_from_file_name() {
        assert!(matches!(
            Direction::from_source(Path::new("/tmp/yarn.lock")).unwrap(),
            Direction::YarnToNpm
        ));
        assert!(matches!(
            Direction::from_source(Path::new("package-lock.json")).unwrap(),
            Direction::NpmToYarn
        ));
        assert!(Direction::from_source(Path::new("Cargo.lock")).is_err());
    }

    #[test]
    fn output_conflicts_with_stdout() {
        let result = Cli::try_parse_from([
            "lockstep",
            "--source-file",
            "yarn.lock",
            "--stdout",
            "--output",
            "out.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn missing_source_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let source = dir.path().join("yarn.lock");

        let manifest = Manifest::parse("{}").unwrap();
        let registry = HttpRegistry::default();
        let err = convert(&source, &Direction::YarnToNpm, &manifest, &registry).unwrap_err();
        assert!(err.to_string().contains("yarn.lock"));
    }
}
