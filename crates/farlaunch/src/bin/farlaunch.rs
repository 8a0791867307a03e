use std::rc::Rc;

use anyhow::Context;
use clap::{CommandFactory, FromArgMatches};

use farlaunch::JobId;
use farlaunch::common::cli::{CommonOpts, MonitorOpts, ResolveOpts, RootOptions, SubCommand};
use farlaunch::common::config::RuntimeConfig;
use farlaunch::common::setup::setup_logging;
use farlaunch::monitor::adapters::create_probe;
use farlaunch::monitor::command::command_channel;
use farlaunch::monitor::remote::{LocalConnector, RemoteSession};
use farlaunch::monitor::{
    JobPhase, MemoryJobStore, MonitorPool, MonitoredJob, RemoteMonitor, StepwisePolicy,
};
use farlaunch::resolve::submission::resolve_submission_file;

fn load_config(opts: &CommonOpts) -> farlaunch::Result<RuntimeConfig> {
    match &opts.config {
        Some(path) => RuntimeConfig::load(path),
        None => RuntimeConfig::from_env(),
    }
}

// Commands

fn command_resolve(config: &RuntimeConfig, opts: ResolveOpts) -> anyhow::Result<()> {
    let resolved = resolve_submission_file(&opts.file, &config.resolver)
        .with_context(|| format!("Cannot resolve {}", opts.file.display()))?;
    let output = if opts.pretty {
        serde_json::to_string_pretty(&resolved)?
    } else {
        serde_json::to_string(&resolved)?
    };
    println!("{output}");
    Ok(())
}

async fn command_monitor(config: &RuntimeConfig, opts: MonitorOpts) -> anyhow::Result<()> {
    let workdir = match opts.workdir {
        Some(workdir) => workdir,
        None => std::env::current_dir()?,
    };
    let workdir = workdir.display().to_string();
    let phase = JobPhase::from(opts.phase);

    let store = MemoryJobStore::default();
    let mut pool = MonitorPool::default();
    let mut senders = Vec::with_capacity(opts.targets.len());
    let mut job_ids = Vec::with_capacity(opts.targets.len());
    for (index, target) in opts.targets.iter().enumerate() {
        let job_id = JobId::new(index as u64 + 1);
        let probe = create_probe(opts.kind, target, &workdir)?;
        store.add_job(job_id, phase);

        let (sender, receiver) = command_channel();
        let monitor = RemoteMonitor::new(
            MonitoredJob {
                id: job_id,
                archive_on_error: opts.archive_on_error,
            },
            probe,
            RemoteSession::new(Box::new(LocalConnector)),
            Box::new(StepwisePolicy::new(&config.monitor)),
            Rc::new(store.clone()),
            receiver,
        );
        pool.add(monitor, phase);
        senders.push(sender);
        job_ids.push(job_id);
    }

    let run = pool.run();
    tokio::pin!(run);
    let mut cancelled = false;
    let results = loop {
        tokio::select! {
            results = &mut run => break results,
            signal = tokio::signal::ctrl_c(), if !cancelled => {
                signal?;
                log::info!("Interrupted, cancelling {} job(s)", senders.len());
                for sender in &senders {
                    sender.cancel();
                }
                cancelled = true;
            }
        }
    };

    let mut failed = 0;
    for (job_id, result) in results {
        if let Err(error) = result {
            log::error!("Job {job_id}: {error}");
            failed += 1;
        }
    }
    let records: Vec<_> = job_ids
        .into_iter()
        .filter_map(|job_id| store.job(job_id))
        .collect();
    println!("{}", serde_json::to_string_pretty(&records)?);

    if failed > 0 {
        anyhow::bail!("Monitoring of {failed} job(s) failed");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> farlaunch::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let config = match load_config(&top_opts.common) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Cannot load configuration: {error}");
            std::process::exit(1);
        }
    };

    let result = match top_opts.subcmd {
        SubCommand::Resolve(opts) => command_resolve(&config, opts),
        SubCommand::Monitor(opts) => command_monitor(&config, opts).await,
    };

    if let Err(e) = result {
        eprintln!("{e:?}");
        std::process::exit(1);
    }

    Ok(())
}
