use std::{env::args, path::PathBuf, str::FromStr};

use anyhow::{bail, Context};
use gramat::{compile, LogTrace, Matcher, Source};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging(trace: bool) {
    let level = match std::env::var("RUST_LOG") {
        Ok(var) => log::LevelFilter::from_str(&var).unwrap_or(log::LevelFilter::Info),
        Err(_) if trace => log::LevelFilter::Trace,
        Err(_) => log::LevelFilter::Info,
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::ConfigBuilder::new()
            .set_time_format_custom(&[])
            .build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Never,
    );
}

fn run() -> anyhow::Result<()> {
    let args = args().skip(1).collect::<Vec<_>>();

    let mut do_rules = false;
    let mut do_trace = false;
    let mut start = None;
    let mut skip = None;
    let mut files = Vec::new();

    let mut iter = args.iter().map(String::as_str);
    while let Some(arg) = iter.next() {
        match arg {
            "--rules" => do_rules = true,
            "--trace" => do_trace = true,
            "--start" => start = Some(iter.next().context("--start expects a rule name")?),
            "--skip" => skip = Some(iter.next().context("--skip expects a rule name")?),
            _ => files.push(arg),
        }
    }

    init_logging(do_trace);

    let (grammar_path, input_path) = match files.as_slice() {
        [] => bail!("usage: gramat <grammar> [input] [--start rule] [--skip rule] [--rules] [--trace]"),
        [grammar] => (PathBuf::from(grammar), None),
        [grammar, input] => (PathBuf::from(grammar), Some(PathBuf::from(input))),
        _ => bail!("at most two files may be provided"),
    };

    let definition = std::fs::read_to_string(&grammar_path)
        .with_context(|| format!("failed to read `{}`", grammar_path.display()))?;
    let rules = compile(&definition)
        .with_context(|| format!("failed to compile `{}`", grammar_path.display()))?;

    if do_rules || input_path.is_none() {
        let mut buf = String::new();
        rules.display_into(&mut buf)?;
        print!("{buf}");
    }

    let Some(input_path) = input_path else {
        return Ok(());
    };

    let start = start.context("matching an input requires --start")?;
    let start = rules.require(start)?;
    let skip = match skip {
        Some(id) => rules.require(id)?,
        None => rules.get("skip").unwrap_or_else(|| rules.empty_handle()),
    };

    let source = Source::from_path(&input_path)?;
    let mut trace = LogTrace::new();
    let mut matcher = if do_trace {
        Matcher::with_trace(&rules, skip, source.as_str(), &mut trace)
    } else {
        Matcher::new(&rules, skip, source.as_str())
    };

    matcher.consume_skip();
    let root = match matcher.match_symbol(start) {
        Some(root) => root,
        None => bail!(
            "`{}` does not match, last failure at offset {}",
            input_path.display(),
            matcher.furthest_failure()
        ),
    };
    matcher.consume_skip();
    if !matcher.at_end() {
        bail!(
            "input not fully consumed, stopped at offset {}",
            matcher.position()
        );
    }

    let mut buf = String::new();
    root.display_into(&rules, source.as_str(), &mut buf)?;
    print!("{buf}");
    Ok(())
}
