use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use midiraster::RasterConfig;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode each instrument of a MIDI file into piano-roll PNG windows
    ToPng {
        #[arg(short, long)]
        midi_file: PathBuf,

        #[command(flatten)]
        raster: RasterArgs,
    },

    /// Decode a piano-roll PNG into a MIDI file
    ToMidi {
        #[arg(short, long)]
        image_file: PathBuf,

        #[command(flatten)]
        raster: RasterArgs,
    },

    /// Write a MIDI file as a CSV table, one row per event
    ToCsv {
        #[arg(short, long)]
        midi_file: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rebuild a MIDI file from a CSV table
    FromCsv {
        #[arg(short, long)]
        csv_file: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RasterArgs {
    #[arg(long, default_value_t = 0.25, help = "Quarter notes per column")]
    resolution: f64,

    #[arg(long, default_value_t = 21, help = "Lowest encodable pitch (inclusive)")]
    lower_bound_note: i32,

    #[arg(long, default_value_t = 127, help = "Highest encodable pitch (exclusive)")]
    upper_bound_note: i32,

    #[arg(long, default_value_t = 100, help = "Columns per window")]
    max_song_length: usize,

    #[arg(long, help = "Maximum number of windows per instrument")]
    max_repetitions: Option<usize>,
}

impl RasterArgs {
    fn config(&self) -> Result<RasterConfig> {
        let config = RasterConfig {
            resolution: self.resolution,
            lower_bound_note: self.lower_bound_note,
            upper_bound_note: self.upper_bound_note,
            max_song_length: self.max_song_length,
            max_repetitions: self.max_repetitions,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::ToPng { midi_file, raster } => {
            let config = raster.config()?;
            let written = midiraster::encode_file(&midi_file, &config)
                .with_context(|| format!("encode {}", midi_file.display()))?;
            info!("{} windows written", written.len());
        }
        Command::ToMidi { image_file, raster } => {
            let config = raster.config()?;
            midiraster::decode_file(&image_file, &config)
                .with_context(|| format!("decode {}", image_file.display()))?;
        }
        Command::ToCsv { midi_file, output } => {
            midiraster::midi_to_csv(&midi_file, &output).context("convert midi file to csv")?;
        }
        Command::FromCsv { csv_file, output } => {
            midiraster::csv_to_midi(&csv_file, &output).context("convert csv to midi file")?;
        }
    }

    Ok(())
}
