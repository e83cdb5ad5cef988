use std::{
    collections::BTreeSet,
    fs::File,
    io::stdout,
    path::PathBuf,
    time::Duration,
};

use clap::{
    ArgAction,
    Parser,
    ValueEnum,
};
use color_eyre::eyre::{
    Error,
    WrapErr,
    bail,
    eyre,
};
use tagdump::{
    config::ZeroSequence,
    decoder::{
        DecodeOptions,
        Limits,
        StreamDecoder,
    },
    emit::{
        CsvEmitter,
        JsonEmitter,
        TextEmitter,
    },
    protocol::{
        Protocol,
        dblk,
    },
    source::{
        Input,
        Stop,
        Tail,
        layered,
    },
};
use tracing::Level;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = dotenvy::dotenv();
    color_eyre::install()?;

    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(args.verbose))
        .with_writer(std::io::stderr)
        .init();

    let config = if args.sectors {
        if args.protocol != Protocol::Dblk {
            bail!("--sectors only applies to the dblk protocol");
        }
        dblk::sector_config(args.zero_seq)
    }
    else {
        args.protocol.config()
    };

    let tags = resolve_types(args.protocol, &args.rtypes)?;

    let stop = Stop::new();
    let file = File::open(&args.input)
        .wrap_err_with(|| format!("could not open {}", args.input.display()))?;
    let mut input = Input::new(file);
    if args.tail {
        input = input.with_tail(Tail {
            timeout: args.timeout,
            stop: stop.clone(),
        });
    }

    let registry = args.protocol.registry();
    let registry = match args.output {
        Output::Text => registry.emitter(TextEmitter::new(stdout())),
        Output::Json => registry.emitter(JsonEmitter::new(stdout())),
        Output::Csv => registry.emitter(CsvEmitter::new(stdout())),
    }
    .build();

    let options = DecodeOptions {
        verbosity: args.verbose.min(5),
        jump: args.jump,
        limits: Limits {
            count: args.num,
            end_offset: args.endpos,
            first_record: args.start_rec,
            last_record: args.last_rec,
            tags,
        },
        stop: stop.clone(),
    };

    let source = layered(input, &config);
    let mut decoder = StreamDecoder::new(source, config, registry, options);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            stop.stop();
        }
    });

    let (decoder, result) = tokio::task::spawn_blocking(move || {
        let result = decoder.run();
        (decoder, result)
    })
    .await?;

    // keep machine readable output clean
    let report = decoder.report();
    match args.output {
        Output::Text => print!("{report}"),
        Output::Json | Output::Csv => eprint!("{report}"),
    }

    let termination = result?;
    tracing::debug!(?termination, "done");

    Ok(())
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0..=2 => Level::WARN,
        3 => Level::INFO,
        4 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn parse_timeout(s: &str) -> Result<Duration, humantime::DurationError> {
    match s.parse::<u64>() {
        Ok(seconds) => Ok(Duration::from_secs(seconds)),
        Err(_) => humantime::parse_duration(s),
    }
}

fn resolve_types(protocol: Protocol, names: &[String]) -> Result<Option<BTreeSet<u16>>, Error> {
    if names.is_empty() {
        return Ok(None);
    }

    let registry = protocol.registry().build();
    names
        .iter()
        .map(|name| {
            registry
                .resolve(name)
                .ok_or_else(|| eyre!("unknown record type: {name}"))
        })
        .collect::<Result<BTreeSet<u16>, Error>>()
        .map(Some)
}

/// Dump framed record streams: tag data logs, SiRF binary and UBX.
#[derive(Debug, Parser)]
#[clap(version)]
struct Args {
    input: PathBuf,

    #[clap(short, long, value_enum, env = "TAGDUMP_PROTOCOL", default_value = "dblk")]
    protocol: Protocol,

    /// Read the raw SD card sectors instead of the file system view.
    #[clap(long)]
    sectors: bool,

    /// Which zero sector sequence numbers are not counted as gaps.
    #[clap(long, value_enum, default_value = "always")]
    zero_seq: ZeroSequence,

    /// Start offset, negative counts from the end.
    #[clap(short, long, allow_negative_numbers = true)]
    jump: Option<i64>,

    /// Stop at the first record starting past this offset.
    #[clap(short = 'x', long)]
    endpos: Option<u64>,

    /// Stop after this many records.
    #[clap(short, long)]
    num: Option<u64>,

    /// Skip records numbered below this.
    #[clap(short = 'r', long)]
    start_rec: Option<u32>,

    /// Stop after this record number.
    #[clap(short, long)]
    last_rec: Option<u32>,

    /// Repeat for more detail, up to -vvvvv.
    #[clap(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Keep waiting for the input to grow.
    #[clap(long)]
    tail: bool,

    /// Pause between polls in tail mode, in seconds or like `500ms`.
    #[clap(short, long, env = "TAGDUMP_TIMEOUT", default_value = "1", value_parser = parse_timeout)]
    timeout: Duration,

    /// Only these record types, by name or number.
    #[clap(long, value_delimiter = ',')]
    rtypes: Vec<String>,

    #[clap(short, long, value_enum, default_value = "text")]
    output: Output,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    Text,
    Json,
    Csv,
}
