use anyhow::{anyhow, Context, Result};
use csv::{Terminator, WriterBuilder};
use std::{fs, io::Write, path::Path};
use tempfile::NamedTempFile;

use super::{Cell, NormalizedTable};

fn write_csv<W: Write>(out: W, table: &NormalizedTable) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(out);
    wtr.write_record(&table.columns).context("writing header row")?;
    for (idx, row) in table.rows.iter().enumerate() {
        wtr.write_record(row.iter().map(Cell::render))
            .with_context(|| format!("writing row {}", idx + 1))?;
    }
    wtr.flush().context("flushing CSV writer")?;
    Ok(())
}

/// Render a table exactly as `write_table` would write it.
pub fn render_table(table: &NormalizedTable) -> Result<String> {
    let mut buf = Vec::new();
    write_csv(&mut buf, table)?;
    String::from_utf8(buf).context("rendered CSV is not UTF-8")
}

/// Write `table` to `path`, replacing any existing file. The data goes to a
/// temporary file in the same folder first and is renamed into place.
/// Returns the size of the written file.
pub fn write_table(path: &Path, table: &NormalizedTable) -> Result<u64> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("output path {} has no parent folder", path.display()))?;

    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary file in {}", dir.display()))?;
    write_csv(tmp.as_file(), table).with_context(|| format!("writing {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("moving output into place at {}", path.display()))?;

    let metadata = fs::metadata(path).context("getting file metadata")?;
    Ok(metadata.len())
}
