//! Append-only write-ahead log for order intents and fills.
//!
//! Tab-separated, one record per line, LF-terminated:
//!
//! ```text
//! INTENT  <client_order_id>  <symbol>  <purpose_int>  [<liquidity_pref_int>]  <reduce_only_01>  <direction>  <qty>  <price>
//! FILL2   <fill_id>  <client_order_id>  <symbol>  <direction>  <qty>  <price>  <fee>
//! FILL    <client_order_id>  <symbol>  <?>  <?>  <direction>  <qty>  <price>           (legacy, read-only)
//! ```
//!
//! Every append is flushed and synced before returning: the caller may treat
//! a successful `append_intent`/`append_fill` as durable.

use anyhow::{anyhow, bail, Context, Result};
use pfcore_schemas::{Direction, FillEvent, Liquidity, LiquidityPreference, OrderIntent, OrderPurpose};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub struct Wal {
    path: PathBuf,
    file: Option<File>,
}

/// Replayed state from a prior run: the set of known intent ids, the set of
/// known fill ids, and the fills in first-seen order with duplicates removed.
pub struct LoadedState {
    pub intent_ids: HashSet<String>,
    pub fill_ids: HashSet<String>,
    pub ordered_fills: Vec<FillEvent>,
}

impl Wal {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    /// Ensure the parent directory exists and open the log in append mode.
    pub fn initialize(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("WAL_INIT_FAILED: create_dir_all {:?}", parent))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("WAL_INIT_FAILED: open {:?}", self.path))?;
        self.file = Some(file);
        tracing::info!(target: "pfcore_wal", path = %self.path.display(), "wal initialized");
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| anyhow!("WAL not initialized"))?;
        file.write_all(line.as_bytes())
            .context("wal append write failed")?;
        file.write_all(b"\n").context("wal append newline failed")?;
        file.flush().context("wal append flush failed")?;
        file.sync_all().context("wal append sync failed")?;
        Ok(())
    }

    pub fn append_intent(&mut self, intent: &OrderIntent) -> Result<()> {
        let line = format!(
            "INTENT\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            intent.client_order_id,
            intent.symbol,
            intent.purpose.to_wire(),
            intent.liquidity_preference.to_wire(),
            intent.reduce_only as u8,
            direction_to_wire(intent.direction),
            intent.qty,
            intent.price,
        );
        self.write_line(&line)
            .context("INTENT_WAL_APPEND_FAILED")?;
        tracing::debug!(target: "pfcore_wal", cid = %intent.client_order_id, "intent appended");
        Ok(())
    }

    pub fn append_fill(&mut self, fill: &FillEvent) -> Result<()> {
        let line = format!(
            "FILL2\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            fill.fill_id,
            fill.client_order_id,
            fill.symbol,
            direction_to_wire(fill.direction),
            fill.qty,
            fill.price,
            fill.fee,
        );
        self.write_line(&line).context("fill wal append failed")?;
        tracing::debug!(target: "pfcore_wal", fill_id = %fill.fill_id, "fill appended");
        Ok(())
    }

    /// Parse the entire log file. Idempotent: a duplicate `fill_id` is kept in
    /// `fill_ids` but dropped from `ordered_fills` (first occurrence wins).
    pub fn load_state(&self) -> Result<LoadedState> {
        let mut intent_ids = HashSet::new();
        let mut fill_ids = HashSet::new();
        let mut ordered_fills = Vec::new();

        if !self.path.exists() {
            return Ok(LoadedState {
                intent_ids,
                fill_ids,
                ordered_fills,
            });
        }

        let file = File::open(&self.path).with_context(|| "WAL_LOAD_FAILED: open")?;
        let reader = BufReader::new(file);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("WAL_LOAD_FAILED: read line {}", lineno + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            match fields.first().copied() {
                Some("INTENT") => {
                    let cid = parse_intent_line(&fields)
                        .with_context(|| format!("WAL_LOAD_FAILED: bad INTENT at line {}", lineno + 1))?;
                    intent_ids.insert(cid);
                }
                Some("FILL2") => {
                    let fill = parse_fill2_line(&fields)
                        .with_context(|| format!("WAL_LOAD_FAILED: bad FILL2 at line {}", lineno + 1))?;
                    if fill_ids.insert(fill.fill_id.clone()) {
                        ordered_fills.push(fill);
                    }
                }
                Some("FILL") => {
                    let fill = parse_legacy_fill_line(&fields)
                        .with_context(|| format!("WAL_LOAD_FAILED: bad FILL at line {}", lineno + 1))?;
                    if fill_ids.insert(fill.fill_id.clone()) {
                        ordered_fills.push(fill);
                    }
                }
                Some(other) => bail!("WAL_LOAD_FAILED: unknown record type {:?} at line {}", other, lineno + 1),
                None => bail!("WAL_LOAD_FAILED: empty record at line {}", lineno + 1),
            }
        }

        tracing::info!(
            target: "pfcore_wal",
            intents = intent_ids.len(),
            fills = ordered_fills.len(),
            "wal loaded"
        );
        Ok(LoadedState {
            intent_ids,
            fill_ids,
            ordered_fills,
        })
    }
}

fn direction_to_wire(d: Direction) -> i8 {
    d as i8
}

fn direction_from_wire(v: i64) -> Direction {
    if v > 0 {
        Direction::Up
    } else if v < 0 {
        Direction::Down
    } else {
        Direction::Flat
    }
}

fn parse_intent_line(fields: &[&str]) -> Result<String> {
    // INTENT cid symbol purpose [liquidity_pref] reduce_only direction qty price
    if fields.len() == 9 {
        let cid = fields[1].to_string();
        Ok(cid)
    } else if fields.len() == 8 {
        // Legacy 8-field form without liquidity_preference.
        let cid = fields[1].to_string();
        Ok(cid)
    } else {
        bail!("INTENT field count mismatch: {}", fields.len())
    }
}

fn parse_fill2_line(fields: &[&str]) -> Result<FillEvent> {
    // FILL2 fill_id cid symbol direction qty price fee
    if fields.len() != 8 {
        bail!("FILL2 field count mismatch: {}", fields.len());
    }
    Ok(FillEvent {
        fill_id: fields[1].to_string(),
        client_order_id: fields[2].to_string(),
        symbol: fields[3].to_string(),
        direction: direction_from_wire(fields[4].parse::<i64>().context("direction")?),
        qty: fields[5].parse::<f64>().context("qty")?,
        price: fields[6].parse::<f64>().context("price")?,
        fee: fields[7].parse::<f64>().context("fee")?,
        liquidity: Liquidity::Unknown,
    })
}

fn parse_legacy_fill_line(fields: &[&str]) -> Result<FillEvent> {
    // FILL cid symbol ? ? direction qty price  (v1, no explicit fill_id)
    if fields.len() != 8 {
        bail!("FILL field count mismatch: {}", fields.len());
    }
    let cid = fields[1].to_string();
    Ok(FillEvent {
        fill_id: format!("{}-legacy", cid),
        client_order_id: cid,
        symbol: fields[2].to_string(),
        direction: direction_from_wire(fields[5].parse::<i64>().context("direction")?),
        qty: fields[6].parse::<f64>().context("qty")?,
        price: fields[7].parse::<f64>().context("price")?,
        fee: 0.0,
        liquidity: Liquidity::Unknown,
    })
}

#[allow(dead_code)]
fn purpose_round_trips(p: OrderPurpose) -> bool {
    OrderPurpose::from_wire(p.to_wire()) == Some(p)
}

#[allow(dead_code)]
fn liquidity_pref_round_trips(p: LiquidityPreference) -> bool {
    LiquidityPreference::from_wire(p.to_wire()) == Some(p)
}
