//! Command-line driver: loads a dataset file, runs a full PLPSI session locally and prints
//! the per-phase timing and communication report.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use log::info;
use plpsi::{simulate, PirMode, ProtocolConfig};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Payable Labeled PSI between a local Sender and Receiver")]
struct Cli {
    /// Number of sender records to load from the dataset
    #[arg(short = 'x', long = "sender-size")]
    sender_size: usize,

    /// Number of receiver queries to load from the dataset
    #[arg(short = 'y', long = "receiver-size")]
    receiver_size: usize,

    /// Claimed intersection size, for reporting only
    #[arg(short = 'i', long = "intersection-size", default_value_t = 0)]
    intersection_size: usize,

    /// Label size in bytes, for reporting only
    #[arg(short = 'p', long = "payload-bytes", default_value_t = 0)]
    payload_bytes: usize,

    /// Batch PIR mode: 1 = default (cuckoo rows), 0 = direct (deterministic rows)
    #[arg(short = 'm', long = "mode", default_value_t = 1)]
    mode: u8,

    /// Dataset file path
    #[arg(short = 'f', long = "file")]
    file: PathBuf,
}

struct Dataset {
    sender: Vec<(Vec<u8>, Vec<u8>)>,
    receiver: Vec<Vec<u8>>,
}

/// Dataset format: a sender header line (ignored), `sender_size` lines of `x,label`, a
/// receiver header line (ignored), `receiver_size` lines of `y`. Carriage returns are
/// stripped.
fn load_dataset(path: &PathBuf, sender_size: usize, receiver_size: usize) -> anyhow::Result<Dataset> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("could not read dataset `{}`", path.display()))?;
    let mut lines = contents.lines().map(|line| line.trim_end_matches('\r'));

    lines.next().context("dataset is missing the sender header")?;
    let mut sender = Vec::with_capacity(sender_size);
    for i in 0..sender_size {
        let line = lines
            .next()
            .with_context(|| format!("sender record {i} missing; expected {sender_size}"))?;
        let (item, label) = line.split_once(',').unwrap_or((line, ""));
        sender.push((item.as_bytes().to_vec(), label.as_bytes().to_vec()));
    }

    lines.next().context("dataset is missing the receiver header")?;
    let mut receiver = Vec::with_capacity(receiver_size);
    for i in 0..receiver_size {
        let line = lines
            .next()
            .with_context(|| format!("receiver query {i} missing; expected {receiver_size}"))?;
        receiver.push(line.as_bytes().to_vec());
    }

    Ok(Dataset { sender, receiver })
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let dataset = load_dataset(&cli.file, cli.sender_size, cli.receiver_size)?;

    let mut config = ProtocolConfig::default();
    config.pir_mode = match cli.mode {
        0 => PirMode::Direct,
        1 => PirMode::Default,
        other => bail!("unknown PIR mode {other}; expected 1 (default) or 0 (direct)"),
    };

    info!(
        "running PLPSI: |X| = {}, |Y| = {}, label bytes = {}, mode = {:?}",
        dataset.sender.len(),
        dataset.receiver.len(),
        cli.payload_bytes,
        config.pir_mode
    );

    let report = simulate(&dataset.sender, &dataset.receiver, &config)
        .map_err(|e| anyhow::anyhow!("protocol aborted: {e}"))?;

    let timings = &report.timings;
    println!("========== PLPSI session report ==========");
    println!("Sender records:       {}", dataset.sender.len());
    println!("Receiver queries:     {}", dataset.receiver.len());
    println!("Intersection found:   {}", report.intersection.len());
    println!("Sender-side size:     {}", report.sender_intersection_size);
    if cli.intersection_size > 0 {
        println!("Claimed size:         {}", cli.intersection_size);
    }
    println!("------------------------------------------");
    println!("Offline phases:");
    println!("  OPRF:               {:>10.3} s", timings.oprf_offline.as_secs_f64());
    println!("  Sender indexing:    {:>10.3} s", timings.hash_offline.as_secs_f64());
    println!("  PIR preparation:    {:>10.3} s", timings.pir_offline.as_secs_f64());
    println!("  OT base:            {:>10.3} s", timings.ot_offline.as_secs_f64());
    println!("  total:              {:>10.3} s", timings.total_offline().as_secs_f64());
    println!("Online phases:");
    println!("  OPRF:               {:>10.3} s", timings.oprf_online.as_secs_f64());
    println!("  Receiver indexing:  {:>10.3} s", timings.hash_online.as_secs_f64());
    println!("  PIR query:          {:>10.3} s", timings.pir_online.as_secs_f64());
    println!("  OT extension:       {:>10.3} s", timings.ot_online.as_secs_f64());
    println!("  Decrypt:            {:>10.3} s", timings.decrypt_online.as_secs_f64());
    println!("  total:              {:>10.3} s", timings.total_online().as_secs_f64());
    println!("------------------------------------------");
    let comm = &report.comm;
    println!("Communication:");
    println!("  OPRF:               {:>10} B", comm.oprf_bytes);
    println!("  Layout metadata:    {:>10} B", comm.layout_bytes);
    println!("  PIR query:          {:>10} B", comm.pir_query_bytes);
    println!("  PIR response:       {:>10} B", comm.pir_response_bytes);
    println!("  OT:                 {:>10} B", comm.ot_bytes);
    println!(
        "  total:              {:>10.3} MB",
        comm.total() as f64 / (1024.0 * 1024.0)
    );
    println!("==========================================");

    if cli.intersection_size > 0 && report.intersection.len() != cli.intersection_size {
        bail!(
            "intersection size mismatch: found {}, claimed {}",
            report.intersection.len(),
            cli.intersection_size
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_parsing_strips_headers_and_carriage_returns() {
        let path = std::env::temp_dir().join("plpsi_cli_dataset_test.csv");
        fs::write(
            &path,
            "db size 3 label bytes 3 item bytes 5\r\n\
             alice,111\r\n\
             bob,222\n\
             carol,333\n\
             query size 2 intersection size 1 item bytes 5\n\
             bob\r\n\
             mallory\n",
        )
        .unwrap();

        let dataset = load_dataset(&path, 3, 2).unwrap();
        assert_eq!(dataset.sender[0], (b"alice".to_vec(), b"111".to_vec()));
        assert_eq!(dataset.sender[2], (b"carol".to_vec(), b"333".to_vec()));
        assert_eq!(dataset.receiver, vec![b"bob".to_vec(), b"mallory".to_vec()]);

        // Asking for more records than the file holds is an error.
        assert!(load_dataset(&path, 4, 2).is_err());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn labels_may_be_absent() {
        let path = std::env::temp_dir().join("plpsi_cli_dataset_nolabel.csv");
        fs::write(&path, "header\nplain_item\nheader\nq\n").unwrap();
        let dataset = load_dataset(&path, 1, 1).unwrap();
        assert_eq!(dataset.sender[0], (b"plain_item".to_vec(), Vec::new()));
        fs::remove_file(&path).unwrap();
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help/version requests exit cleanly; genuine CLI errors exit with code 1.
            if err.use_stderr() {
                eprintln!("{err}");
                return ExitCode::from(1);
            }
            print!("{err}");
            return ExitCode::SUCCESS;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
