#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pagefit::document;
use pagefit::images::{self, ImagesOptions, Placement};
use pagefit::pages::{apply_moves, parse_page_range, Move, PageOrder};
use pagefit::split;
use pagefit::{compute_layout, compute_margin_fit, FitMode, PageSize};

#[derive(Parser)]
#[command(
    name = "pagefit",
    version,
    about = "Place images on PDF pages, pick and reorder pages"
)]
struct Cli {
    /// num parallel threads (default number of CPUs)
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,

    /// suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// combine images into a PDF, one image per page
    Images {
        /// input image files, dirs or glob patterns (png, jpg, tiff, bmp, gif)
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// output PDF path, "-" for stdout
        #[arg(short, long, default_value = "output.pdf")]
        output: PathBuf,

        /// page size
        #[arg(long, default_value = "letter")]
        pagesize: PageSize,

        /// how images are scaled onto the page
        #[arg(long, default_value = "fit")]
        fit: FitMode,

        /// scale to the page minus a fixed 40pt margin instead of --fit
        #[arg(long, conflicts_with = "fit")]
        margin_fit: bool,

        /// move the image at position FROM to position TO (1-based, repeatable)
        #[arg(long = "move", value_name = "FROM:TO")]
        moves: Vec<Move>,

        /// PDF title metadata
        #[arg(long)]
        title: Option<String>,

        /// PDF author metadata
        #[arg(long)]
        author: Option<String>,
    },
    /// append PDFs into one document
    Combine {
        /// input PDF files, in order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// output PDF path, "-" for stdout
        #[arg(short, long, default_value = "combined.pdf")]
        output: PathBuf,

        /// move the file at position FROM to position TO (1-based, repeatable)
        #[arg(long = "move", value_name = "FROM:TO")]
        moves: Vec<Move>,
    },
    /// keep only the selected pages
    Extract {
        /// input PDF file
        input: PathBuf,

        /// page selection (e.g. "1", "1,3-5,10")
        #[arg(short, long)]
        pages: String,

        /// output PDF path (default <input>_extracted.pdf), "-" for stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// write each page to its own PDF
    Split {
        /// input PDF file
        input: PathBuf,

        /// output dir (default next to input file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// page selection (e.g. "1", "1,3-5,10")
        #[arg(short, long)]
        pages: Option<String>,
    },
    /// remove the selected pages
    Delete {
        /// input PDF file
        input: PathBuf,

        /// pages to delete (e.g. "1", "1,3-5,10")
        #[arg(short, long)]
        pages: String,

        /// output PDF path (default <input>_modified.pdf), "-" for stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// rotate pages clockwise
    Rotate {
        /// input PDF file
        input: PathBuf,

        /// rotation in degrees
        #[arg(short, long, default_value = "90")]
        angle: Angle,

        /// pages to rotate (default all)
        #[arg(short, long)]
        pages: Option<String>,

        /// output PDF path (default <input>_rotated.pdf), "-" for stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// deflate uncompressed streams and drop unused objects
    Compress {
        /// input PDF file
        input: PathBuf,

        /// output PDF path (default <input>_compressed.pdf), "-" for stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// print where an image would be drawn on a page, as JSON
    Layout {
        /// image width in pixels
        #[arg(long)]
        width: f64,

        /// image height in pixels
        #[arg(long)]
        height: f64,

        /// page size
        #[arg(long, default_value = "letter")]
        pagesize: PageSize,

        /// how the image is scaled onto the page
        #[arg(long, default_value = "fit")]
        fit: FitMode,

        /// use the fixed 40pt margin policy instead of --fit
        #[arg(long, conflicts_with = "fit")]
        margin_fit: bool,
    },
    /// print the page numbers a selection resolves to, as JSON
    Pages {
        /// page selection (e.g. "1,3-5,10")
        spec: String,

        /// number of pages in the document
        #[arg(short, long)]
        total: u32,

        /// deletion order: highest first, refuses to select every page
        #[arg(long)]
        desc: bool,
    },
    /// generate shell completions
    Completions {
        /// shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Angle {
    #[value(name = "90")]
    Quarter,
    #[value(name = "180")]
    Half,
    #[value(name = "270")]
    ThreeQuarter,
}

impl Angle {
    fn degrees(self) -> i64 {
        match self {
            Angle::Quarter => 90,
            Angle::Half => 180,
            Angle::ThreeQuarter => 270,
        }
    }
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .init();
}

/// `<dir>/<stem>_<suffix>.pdf` next to the input
fn derived_output(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    input.with_file_name(format!("{}_{}.pdf", stem, suffix))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::Images {
            images,
            output,
            pagesize,
            fit,
            margin_fit,
            moves,
            title,
            author,
        } => {
            let images = images::expand_image_paths(&images)?;
            let images = apply_moves(images, &moves).context("Cannot reorder images")?;
            let options = ImagesOptions {
                page_size: pagesize,
                placement: if margin_fit {
                    Placement::MarginFit
                } else {
                    Placement::Mode(fit)
                },
                title,
                author,
            };
            let start = std::time::Instant::now();
            let mut doc = images::images_to_pdf(&images, &options)?;
            document::save(&mut doc, &output)?;
            info!(
                "Done. {} saved in {:.2}s",
                output.display(),
                start.elapsed().as_secs_f64()
            );
        }
        Commands::Combine {
            inputs,
            output,
            moves,
        } => {
            let inputs = apply_moves(inputs, &moves).context("Cannot reorder inputs")?;
            info!("Combining {} PDF(s) -> {}", inputs.len(), output.display());
            let docs = inputs
                .iter()
                .map(|path| document::load(path))
                .collect::<Result<Vec<_>>>()?;
            let mut combined = document::combine(docs)?;
            document::write_info(&mut combined, None, None);
            document::save(&mut combined, &output)?;
            info!(
                "Done. {} pages -> {}",
                document::page_count(&combined),
                output.display()
            );
        }
        Commands::Extract {
            input,
            pages,
            output,
        } => {
            let output = output.unwrap_or_else(|| derived_output(&input, "extracted"));
            let mut doc = document::load(&input)?;
            let total = document::page_count(&doc);
            let selected = parse_page_range(&pages, total, PageOrder::Ascending)
                .with_context(|| format!("Cannot select pages {:?} of {}", pages, input.display()))?;
            document::keep_pages(&mut doc, &selected);
            document::save(&mut doc, &output)?;
            info!(
                "Extracted {} of {} pages -> {}",
                selected.len(),
                total,
                output.display()
            );
        }
        Commands::Split {
            input,
            output,
            pages,
        } => {
            let output_dir = output.unwrap_or_else(|| {
                input
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .to_path_buf()
            });
            split::split_pdf(&input, &output_dir, pages.as_deref())?;
        }
        Commands::Delete {
            input,
            pages,
            output,
        } => {
            let output = output.unwrap_or_else(|| derived_output(&input, "modified"));
            let mut doc = document::load(&input)?;
            let total = document::page_count(&doc);
            let doomed = parse_page_range(&pages, total, PageOrder::Descending)
                .with_context(|| format!("Cannot delete pages {:?} of {}", pages, input.display()))?;
            document::remove_pages(&mut doc, &doomed);
            doc.prune_objects();
            document::save(&mut doc, &output)?;
            info!(
                "Deleted {} of {} pages -> {}",
                doomed.len(),
                total,
                output.display()
            );
        }
        Commands::Rotate {
            input,
            angle,
            pages,
            output,
        } => {
            let output = output.unwrap_or_else(|| derived_output(&input, "rotated"));
            let mut doc = document::load(&input)?;
            let total = document::page_count(&doc);
            let selected = match pages {
                Some(spec) => parse_page_range(&spec, total, PageOrder::Ascending)
                    .with_context(|| format!("Cannot select pages {:?} of {}", spec, input.display()))?,
                None => (1..=total).collect(),
            };
            document::rotate_pages(&mut doc, &selected, angle.degrees())?;
            document::save(&mut doc, &output)?;
            info!(
                "Rotated {} page{} by {} degrees -> {}",
                selected.len(),
                if selected.len() == 1 { "" } else { "s" },
                angle.degrees(),
                output.display()
            );
        }
        Commands::Compress { input, output } => {
            let output = output.unwrap_or_else(|| derived_output(&input, "compressed"));
            let before = std::fs::metadata(&input).map(|m| m.len()).ok();
            let mut doc = document::load(&input)?;
            document::compress(&mut doc);
            document::save(&mut doc, &output)?;
            let after = std::fs::metadata(&output).map(|m| m.len()).ok();
            match (before, after) {
                (Some(before), Some(after)) => info!(
                    "Compressed {} -> {} ({} -> {} bytes)",
                    input.display(),
                    output.display(),
                    before,
                    after
                ),
                _ => info!("Compressed {} -> {}", input.display(), output.display()),
            }
        }
        Commands::Layout {
            width,
            height,
            pagesize,
            fit,
            margin_fit,
        } => {
            let layout = if margin_fit {
                anyhow::ensure!(height > 0.0, "image height must be a positive number, got {}", height);
                let (pw, ph) = pagesize.dimensions_pt();
                compute_margin_fit(pw, ph, width / height)?
            } else {
                compute_layout(width, height, pagesize, fit)?
            };
            print_json(&layout)?;
        }
        Commands::Pages { spec, total, desc } => {
            let order = if desc {
                PageOrder::Descending
            } else {
                PageOrder::Ascending
            };
            print_json(&parse_page_range(&spec, total, order)?)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "pagefit",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
