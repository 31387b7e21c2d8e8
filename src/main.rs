mod cli;
mod handlers;
mod printer;
mod utils;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use plainmark::{render, Config};
use tracing_subscriber::EnvFilter;

use crate::handlers::run::RunOptions;
use crate::printer::MarkdownPrinter;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PLAINMARK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let args = cli::Cli::parse();

    let mut cfg = Config::load();
    if args.block_headers {
        cfg.set("BLOCK_HEADERS", "true");
    }

    if args.example {
        let path = args.file.clone().unwrap_or_else(|| PathBuf::from("example.md"));
        return handlers::example::write(&path);
    }

    let md = if args.no_md {
        false
    } else if args.md {
        true
    } else {
        cfg.get_bool("PRETTIFY_MARKDOWN")
    };
    let budget = Duration::from_millis(cfg.get_u64("DEFERRED_BUDGET_MS").unwrap_or(2000));

    if args.repl {
        let mut engine = handlers::build_engine(&cfg, args.memory_storage)?;
        return handlers::repl::run(&mut engine, md, budget).await;
    }

    let opts = RunOptions {
        html: args.html,
        vars: args.vars,
        dom: args.dom,
        deferred_budget: if args.no_deferred { None } else { Some(budget) },
    };

    if args.watch {
        let Some(path) = args.file.as_deref() else {
            bail!("--watch needs a FILE");
        };
        let delay = Duration::from_millis(cfg.get_u64("AUTORUN_DEBOUNCE_MS").unwrap_or(1000));
        let mut engine = handlers::build_engine(&cfg, args.memory_storage)?;
        return handlers::watch::run(&mut engine, path, &opts, delay).await;
    }

    let source = utils::read_input(args.file.as_deref())?;

    if args.render {
        println!("{}", render::render(&source));
        return Ok(());
    }
    if args.show {
        if md {
            MarkdownPrinter::default().print(&source);
        } else {
            println!("{}", source);
        }
        return Ok(());
    }

    let mut engine = handlers::build_engine(&cfg, args.memory_storage)?;
    let status = handlers::run::run(&mut engine, &source, &opts).await?;
    let code = handlers::run::exit_code(status);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
