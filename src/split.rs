use anyhow::{Context, Result};
use lopdf::Document;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info};

use crate::document::{page_count, single_page};
use crate::pages::{parse_page_range, PageOrder};

/// file name of the single-page PDF written for `page`
pub fn page_file_name(stem: &str, page: u32) -> String {
    format!("{}_page_{:03}.pdf", stem, page)
}

/// write every selected page of `input` to its own PDF in `output_dir`
///
/// Returns the written paths in page order.
pub fn split_pdf(input: &Path, output_dir: &Path, pages: Option<&str>) -> Result<Vec<PathBuf>> {
    let bytes =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let num_pages = {
        let doc = Document::load_mem(&bytes)
            .with_context(|| format!("Failed to open {}", input.display()))?;
        page_count(&doc)
    };
    anyhow::ensure!(num_pages > 0, "{} has no pages", input.display());

    let page_numbers: Vec<u32> = match pages {
        Some(s) => parse_page_range(s, num_pages, PageOrder::Ascending)?,
        None => (1..=num_pages).collect(),
    };
    let total = page_numbers.len();

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Cannot create output dir: {}", output_dir.display()))?;

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document")
        .to_string();

    info!(
        "Splitting {} ({} of {} page{}) -> {}",
        input.display(),
        total,
        num_pages,
        if num_pages == 1 { "" } else { "s" },
        output_dir.display()
    );

    let start = std::time::Instant::now();
    let done_count = AtomicUsize::new(0);

    // one task per chunk parses the document once, each page copies only
    // the objects it uses
    let num_workers = rayon::current_num_threads().max(1);
    let chunk_size = total.div_ceil(num_workers).max(1);

    let results: Vec<(u32, Result<PathBuf>)> = page_numbers
        .par_chunks(chunk_size)
        .flat_map_iter(|chunk| {
            let source = Document::load_mem(&bytes)
                .with_context(|| format!("Failed to open {}", input.display()));
            chunk
                .iter()
                .map(|&page| {
                    let result = source
                        .as_ref()
                        .map_err(|e| anyhow::anyhow!("{:#}", e))
                        .and_then(|source| {
                            let mut doc = single_page(source, page)?;
                            let out_path = output_dir.join(page_file_name(&stem, page));
                            doc.save(&out_path)
                                .with_context(|| format!("Failed to save {}", out_path.display()))?;
                            let done = done_count.fetch_add(1, Ordering::Relaxed) + 1;
                            info!("  [{}/{}] {}", done, total, out_path.display());
                            Ok(out_path)
                        });
                    (page, result)
                })
                .collect::<Vec<_>>()
        })
        .collect();

    let mut written = Vec::with_capacity(total);
    let mut errors = Vec::new();
    for (page, result) in results {
        match result {
            Ok(path) => written.push(path),
            Err(e) => errors.push((page, e)),
        }
    }

    if let Some((page, err)) = errors.first() {
        let count = errors.len();
        for (page, err) in &errors {
            error!("page {}: {:#}", page, err);
        }
        anyhow::bail!(
            "Failed on page {} ({} total error{}): {:#}",
            page,
            count,
            if count == 1 { "" } else { "s" },
            err
        );
    }

    info!(
        "Done. {} page{} in {:.2}s",
        total,
        if total == 1 { "" } else { "s" },
        start.elapsed().as_secs_f64()
    );
    Ok(written)
}
