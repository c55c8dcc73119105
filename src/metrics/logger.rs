use super::{DecisionLog, DecisionRecord, PublicGoodsRecord, TeamStatus, UltimatumRecord};
use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use csv::Writer;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tracing::{error, info};

enum LogEvent {
    Decision(DecisionRecord),
    Team(TeamStatus),
    PublicGoods(PublicGoodsRecord),
    Ultimatum(UltimatumRecord),
}

#[derive(Serialize)]
struct TeamRow<'a> {
    round: u32,
    iteration: u32,
    event: &'a str,
    group: u32,
    members: String,
    pay: f64,
}

struct Writers {
    decisions: Writer<File>,
    teams: Writer<File>,
    public_goods: Writer<File>,
    ultimatums: Writer<File>,
}

impl Writers {
    fn open(dir: &Path) -> Result<Self> {
        let open = |name: &str| {
            let path = dir.join(name);
            Writer::from_path(&path).with_context(|| format!("creating {}", path.display()))
        };
        Ok(Self {
            decisions: open("decisions.csv")?,
            teams: open("teams.csv")?,
            public_goods: open("public_goods.csv")?,
            ultimatums: open("ultimatum.csv")?,
        })
    }

    fn write(&mut self, event: LogEvent) -> Result<()> {
        match event {
            LogEvent::Decision(r) => self.decisions.serialize(r)?,
            LogEvent::PublicGoods(r) => self.public_goods.serialize(r)?,
            LogEvent::Ultimatum(r) => self.ultimatums.serialize(r)?,
            LogEvent::Team(status) => {
                for g in &status.groups {
                    let members = g
                        .members
                        .iter()
                        .map(|m| m.to_string())
                        .collect::<Vec<_>>()
                        .join(";");
                    self.teams.serialize(TeamRow {
                        round: status.round,
                        iteration: status.iteration,
                        event: &status.event,
                        group: g.group.raw(),
                        members,
                        pay: g.pay,
                    })?;
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.decisions.flush()?;
        self.teams.flush()?;
        self.public_goods.flush()?;
        self.ultimatums.flush()?;
        Ok(())
    }
}

fn drain(rx: Receiver<LogEvent>, mut writers: Writers) -> Result<u64> {
    let mut written = 0;
    while let Ok(first) = rx.recv() {
        writers.write(first)?;
        written += 1;
        for event in rx.try_iter() {
            writers.write(event)?;
            written += 1;
        }
        writers.flush()?;
    }
    writers.flush()?;
    Ok(written)
}

/// CSV experiment log. Records go down a channel to a writer thread, so the
/// simulation never waits on the disk.
///
/// Writes `decisions.csv`, `teams.csv`, `public_goods.csv` and
/// `ultimatum.csv` into one directory.
pub struct DecisionLogger {
    dir: PathBuf,
    sender: Mutex<Option<Sender<LogEvent>>>,
    worker: Mutex<Option<JoinHandle<Result<u64>>>>,
}

impl DecisionLogger {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let writers = Writers::open(&dir)?;
        let (tx, rx) = channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("decision-log".to_string())
            .spawn(move || drain(rx, writers))
            .context("spawning log writer")?;
        Ok(Self {
            dir,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn send(&self, event: LogEvent) {
        if let Some(tx) = self.sender.lock().as_ref() {
            if tx.send(event).is_err() {
                error!("Log writer has stopped; dropping record");
            }
        }
    }

    /// Stops accepting records and waits for everything queued to be written.
    pub fn close(&self) -> Result<u64> {
        self.sender.lock().take();
        let Some(worker) = self.worker.lock().take() else {
            return Ok(0);
        };
        let written = worker
            .join()
            .map_err(|_| anyhow::anyhow!("log writer thread panicked"))??;
        info!("Wrote {} log records to {}", written, self.dir.display());
        Ok(written)
    }
}

impl Drop for DecisionLogger {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Closing decision log failed: {}", e);
        }
    }
}

impl DecisionLog for DecisionLogger {
    fn record_decision(&self, record: DecisionRecord) {
        self.send(LogEvent::Decision(record));
    }

    fn record_team_status(&self, status: TeamStatus) {
        self.send(LogEvent::Team(status));
    }

    fn record_public_goods(&self, record: PublicGoodsRecord) {
        self.send(LogEvent::PublicGoods(record));
    }

    fn record_ultimatum(&self, record: UltimatumRecord) {
        self.send(LogEvent::Ultimatum(record));
    }

    fn wants_team_status(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Phase;
    use crate::ids::{AgentId, GroupId};
    use crate::metrics::GroupStatus;

    #[test]
    fn writes_every_queued_record() {
        let dir = std::env::temp_dir().join(format!("teamforge-log-{}", std::process::id()));
        let logger = DecisionLogger::new(&dir).unwrap();
        for i in 0..3 {
            logger.record_decision(DecisionRecord {
                round: 0,
                iteration: i,
                phase: Phase::Propose,
                actor: i,
                option: None,
                current_pay: 0.0,
                projected_pay: 0.0,
                chosen: false,
            });
        }
        logger.record_team_status(TeamStatus {
            round: 0,
            iteration: 0,
            event: "apply".to_string(),
            groups: vec![GroupStatus {
                group: GroupId::new(0),
                members: vec![AgentId::new(0), AgentId::new(1)],
                pay: 5.0,
            }],
        });
        assert_eq!(logger.close().unwrap(), 4);
        let teams = fs::read_to_string(dir.join("teams.csv")).unwrap();
        assert!(teams.contains("0;1"));
        let decisions = fs::read_to_string(dir.join("decisions.csv")).unwrap();
        assert_eq!(decisions.lines().count(), 4);
        fs::remove_dir_all(&dir).ok();
    }
}
