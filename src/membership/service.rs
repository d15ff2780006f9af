use super::types::{WorkerId, WorkerInfo, WorkerState};
use crate::config::EngineConfig;
use crate::protocol::{ControlMessage, now_ms};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::info;

pub struct MembershipService {
    pub members: Arc<DashMap<WorkerId, WorkerInfo>>,
    suspect_timeout: Duration,
    dead_timeout: Duration,
    detection_interval: Duration,
    /// Bumped whenever the live set changes.
    version: watch::Sender<u64>,
}

impl MembershipService {
    pub fn new(
        suspect_timeout: Duration,
        dead_timeout: Duration,
        detection_interval: Duration,
    ) -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new(Self {
            members: Arc::new(DashMap::new()),
            suspect_timeout,
            dead_timeout,
            detection_interval,
            version,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Arc<Self> {
        Self::new(
            config.suspect_timeout,
            config.dead_timeout,
            config.failure_detection_interval,
        )
    }

    pub fn handle_control(&self, msg: ControlMessage) {
        match msg {
            ControlMessage::Register { worker } => self.register(worker),
            ControlMessage::Heartbeat { worker } => self.heartbeat(&worker),
            ControlMessage::Deregister { worker } => self.deregister(&worker),
        }
    }

    /// Adds a worker, or revives one previously declared dead.
    pub fn register(&self, id: WorkerId) {
        let changed = match self.members.get_mut(&id) {
            Some(mut existing) => {
                existing.last_seen = Some(Instant::now());
                let revived = existing.state == WorkerState::Dead;
                existing.state = WorkerState::Alive;
                revived
            }
            None => {
                self.members.insert(
                    id.clone(),
                    WorkerInfo {
                        id: id.clone(),
                        state: WorkerState::Alive,
                        heartbeats: 0,
                        registered_at_ms: now_ms(),
                        last_seen: Some(Instant::now()),
                    },
                );
                true
            }
        };

        if changed {
            info!("Worker {} joined", id);
            self.bump();
        }
    }

    pub fn heartbeat(&self, id: &WorkerId) {
        let known = match self.members.get_mut(id) {
            Some(mut member) => {
                member.heartbeats += 1;
                member.last_seen = Some(Instant::now());
                match member.state {
                    WorkerState::Alive => true,
                    WorkerState::Suspect => {
                        tracing::info!("Worker {} refuted suspicion", id);
                        member.state = WorkerState::Alive;
                        true
                    }
                    // A dead worker must re-enter through `register`.
                    WorkerState::Dead => false,
                }
            }
            None => false,
        };

        if !known {
            tracing::debug!("Heartbeat from unknown or dead worker {}, registering", id);
            self.register(id.clone());
        }
    }

    pub fn deregister(&self, id: &WorkerId) {
        let changed = match self.members.get_mut(id) {
            Some(mut member) if member.state != WorkerState::Dead => {
                member.state = WorkerState::Dead;
                true
            }
            _ => false,
        };

        if changed {
            info!("Worker {} left", id);
            self.bump();
        }
    }

    /// Workers eligible to own partitions, sorted by id.
    pub fn live_workers(&self) -> Vec<WorkerId> {
        let mut workers: Vec<WorkerId> = self
            .members
            .iter()
            .filter(|entry| entry.value().is_live())
            .map(|entry| entry.key().clone())
            .collect();
        workers.sort();
        workers
    }

    pub fn get_member(&self, id: &WorkerId) -> Option<WorkerInfo> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn members(&self) -> Vec<WorkerInfo> {
        let mut members: Vec<WorkerInfo> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// One failure-detection round. Returns the workers declared dead in it.
    pub fn detect_failures(&self, now: Instant) -> Vec<WorkerId> {
        let mut newly_dead = Vec::new();

        for mut entry in self.members.iter_mut() {
            let member = entry.value_mut();

            let Some(last_seen) = member.last_seen else {
                member.last_seen = Some(now);
                continue;
            };
            let elapsed = now.saturating_duration_since(last_seen);

            match member.state {
                WorkerState::Alive => {
                    if elapsed > self.suspect_timeout {
                        tracing::warn!(
                            "Worker {} suspected (no contact for {:?})",
                            member.id,
                            elapsed
                        );
                        member.state = WorkerState::Suspect;
                    }
                }
                WorkerState::Suspect => {
                    if elapsed > self.dead_timeout {
                        tracing::warn!(
                            "Worker {} declared DEAD (no contact for {:?})",
                            member.id,
                            elapsed
                        );
                        member.state = WorkerState::Dead;
                        newly_dead.push(member.id.clone());
                    }
                }
                WorkerState::Dead => {}
            }
        }

        if !newly_dead.is_empty() {
            self.bump();
            info!("Cluster size now: {} live workers", self.live_workers().len());
        }

        newly_dead
    }

    pub async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.detection_interval);

        loop {
            interval.tick().await;
            self.detect_failures(Instant::now());
        }
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }
}
