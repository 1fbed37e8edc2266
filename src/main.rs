#[macro_use]
extern crate log;

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use agentx_subagent::{
    configuration::AgentConfig,
    object::{BoxFuture, GetNextResult, GetResult, ManagedObject, SetOutcome},
    oid, AgentXError, CloseReason, Oid, Registration, Subagent, Value, VarBind,
};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Demo AgentX sub-agent", long_about = None)]
struct Cli {
    #[command(flatten)]
    agent: AgentConfig,
    /// Subtree served by the demo objects
    #[arg(long, default_value = "1.3.6.1.4.1.8072.9999.9999.7375")]
    subtree: Oid,
    /// Seconds between reconnection attempts
    #[arg(long, default_value_t = 5)]
    retry: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = cli.agent.validate() {
        error!("{}", e);
        std::process::exit(2);
    }

    info!("Configuration valid. Starting up...");

    let scalars = Arc::new(DemoScalars::new(cli.subtree.clone()));
    loop {
        match serve(&cli, scalars.clone()).await {
            Ok(reason) if reason == CloseReason::Shutdown => break,
            Ok(reason) => warn!("Session closed: {:?}", reason),
            Err(e) => warn!("Session ended: {}", e),
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(cli.retry)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

async fn serve(cli: &Cli, scalars: Arc<DemoScalars>) -> Result<CloseReason, AgentXError> {
    let mut agent = Subagent::connect(cli.agent.clone()).await?;
    agent.open().await?;
    agent
        .register(
            Registration::new(cli.subtree.clone()).with_timeout(cli.agent.timeout),
            scalars,
        )
        .await?;
    // coldStart
    agent
        .notify(oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 1), Vec::new())
        .await?;

    agent
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}

/// Four scalars: a description, a writable integer, the uptime and the
/// local time.
struct DemoScalars {
    base: Oid,
    started: Instant,
    value: Mutex<i32>,
    /// Value under test and the one it replaces.
    pending: Mutex<Option<(i32, i32)>>,
}

impl DemoScalars {
    fn new(base: Oid) -> Self {
        DemoScalars {
            base,
            started: Instant::now(),
            value: Mutex::new(0),
            pending: Mutex::new(None),
        }
    }

    fn instances(&self) -> [Oid; 4] {
        [1, 2, 3, 4].map(|n| self.base.join(&[n, 0]))
    }

    fn read(&self, column: u32) -> Option<Value> {
        match column {
            1 => Some(Value::from("AgentX demo sub-agent")),
            2 => self.value.lock().ok().map(|v| Value::Integer(*v)),
            3 => {
                let ticks = self.started.elapsed().as_millis() / 10;
                Some(Value::TimeTicks(u32::try_from(ticks).unwrap_or(u32::MAX)))
            }
            4 => Some(Value::date_and_time(&chrono::Local::now())),
            _ => None,
        }
    }

    fn column(&self, oid: &Oid) -> Option<u32> {
        self.instances()
            .iter()
            .position(|i| i == oid)
            .and_then(|p| u32::try_from(p + 1).ok())
    }
}

impl ManagedObject for DemoScalars {
    fn get<'a>(&'a self, oid: &'a Oid) -> BoxFuture<'a, GetResult> {
        Box::pin(async move {
            match self.column(oid).and_then(|c| self.read(c)) {
                Some(value) => GetResult::Value(value),
                None if self.base.contains(oid) => GetResult::NoSuchInstance,
                None => GetResult::NoSuchObject,
            }
        })
    }

    fn get_next<'a>(&'a self, oid: &'a Oid, include: bool) -> BoxFuture<'a, GetNextResult> {
        Box::pin(async move {
            let next = self.instances().into_iter().zip(1u32..).find(|(instance, _)| {
                match instance.compare(oid) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Equal => include,
                    std::cmp::Ordering::Less => false,
                }
            });
            match next.and_then(|(instance, c)| self.read(c).map(|v| VarBind::new(instance, v))) {
                Some(vb) => GetNextResult::Value(vb),
                None => GetNextResult::EndOfMibView,
            }
        })
    }

    fn test_set<'a>(&'a self, varbind: &'a VarBind) -> BoxFuture<'a, SetOutcome> {
        Box::pin(async move {
            match self.column(&varbind.oid) {
                Some(2) => {}
                Some(_) => return SetOutcome::NotWritable,
                None => return SetOutcome::NoCreation,
            }
            let Value::Integer(new) = varbind.value else {
                return SetOutcome::WrongType;
            };
            let (Ok(current), Ok(mut pending)) = (self.value.lock(), self.pending.lock()) else {
                return SetOutcome::ResourceUnavailable;
            };
            if pending.is_some() {
                return SetOutcome::ResourceUnavailable;
            }
            *pending = Some((new, *current));
            SetOutcome::NoError
        })
    }

    fn commit_set<'a>(&'a self, _oid: &'a Oid) -> BoxFuture<'a, SetOutcome> {
        Box::pin(async move {
            let (Ok(mut current), Ok(pending)) = (self.value.lock(), self.pending.lock()) else {
                return SetOutcome::CommitFailed;
            };
            match *pending {
                Some((new, _)) => {
                    info!("Demo value {} -> {}", *current, new);
                    *current = new;
                    SetOutcome::NoError
                }
                None => SetOutcome::CommitFailed,
            }
        })
    }

    fn undo_set<'a>(&'a self, _oid: &'a Oid) -> BoxFuture<'a, SetOutcome> {
        Box::pin(async move {
            let (Ok(mut current), Ok(mut pending)) = (self.value.lock(), self.pending.lock()) else {
                return SetOutcome::UndoFailed;
            };
            if let Some((_, old)) = pending.take() {
                *current = old;
            }
            SetOutcome::NoError
        })
    }

    fn cleanup_set<'a>(&'a self, _oid: &'a Oid) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Ok(mut pending) = self.pending.lock() {
                pending.take();
            }
        })
    }
}
