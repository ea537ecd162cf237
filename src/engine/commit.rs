use std::io;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub(super) const CHANNEL_CAPACITY: usize = 4096;

type Ack = oneshot::Sender<io::Result<()>>;

pub(super) enum WalCommand {
    Append { event: Event, response: Ack },
    Rewrite { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
    /// Stall the writer until `resume` fires or is dropped.
    #[cfg(test)]
    Pause { resume: oneshot::Receiver<()> },
}

/// Background task owning the WAL. Appends are group-committed:
/// block for the first one, drain whatever else is already queued,
/// then make the whole batch durable with a single fsync.
pub(super) async fn run_wal_writer(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut deferred: Option<WalCommand> = None;
    loop {
        let cmd = match deferred.take() {
            Some(cmd) => cmd,
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };

        #[cfg(test)]
        if let WalCommand::Pause { resume } = cmd {
            let _ = resume.await;
            continue;
        }

        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Commit what we have before letting a control command see the log.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
    }
    tracing::debug!("WAL writer stopped: all senders dropped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, Ack)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    // On failure the WAL rolls back to its last durable length, so nothing of
    // this batch can resurface with a later one.
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());

    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL batch of {} failed: {e}", batch.len());
    }

    for (_, tx) in batch {
        let ack = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(ack);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Rewrite { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
        #[cfg(test)]
        WalCommand::Pause { .. } => unreachable!("pauses are awaited by the writer loop"),
    }
}
