// SPDX-License-Identifier: GPL-2.0
use anyhow::bail;
use clap::Parser;
use log::error;
use log::info;
use vc4_stress::run;
use vc4_stress::Opts;
use vc4_stress::SKIP_EXIT_CODE;
use vc4_stress::SUBTEST;

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    if opts.list_subtests {
        println!("{}", SUBTEST);
        return Ok(());
    }
    if let Some(name) = &opts.run_subtest {
        if name != SUBTEST {
            bail!("unknown subtest {}, see --list-subtests", name);
        }
    }

    let llv = match &opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };

    let mut config_builder = simplelog::ConfigBuilder::new();
    let _ = config_builder.set_time_offset_to_local();

    simplelog::TermLogger::init(
        llv,
        config_builder
            .set_time_level(simplelog::LevelFilter::Error)
            .set_location_level(simplelog::LevelFilter::Off)
            .set_target_level(simplelog::LevelFilter::Off)
            .set_thread_level(simplelog::LevelFilter::Off)
            .build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    info!("Starting subtest: {}", SUBTEST);
    match run(&opts) {
        Ok(report) => {
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            info!("Subtest {}: SUCCESS", SUBTEST);
            Ok(())
        }
        Err(e) if e.is_skip() => {
            info!("Subtest {}: SKIP ({})", SUBTEST, e);
            std::process::exit(SKIP_EXIT_CODE);
        }
        Err(e) => {
            error!("Subtest {}: FAIL", SUBTEST);
            Err(e.into())
        }
    }
}
