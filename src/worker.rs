//! Worker threads and the typed message protocol between them and the
//! scheduler.
//!
//! Each worker owns a reference to a partitioned dataset and a cost
//! function, receives [`WorkerRequest`]s on its own channel and answers on a
//! channel shared by the whole pool. Genomes cross the boundary as JSON
//! exports, so workers never share mutable state with the scheduler.
//!
//! The pool keeps a table from task id to the worker that was handed the
//! task. A response for a task that is not in the table is a protocol
//! violation and surfaces as [`WorkerError::UnknownTask`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::cost::Cost;
use crate::dataset::{DataSetDir, DataSetError};
use crate::genome::{Creature, CreatureError};
use crate::network::{Network, TrainConfig};

/// Scheduler-assigned task id.
pub type TaskId = u64;

/// Messages sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerRequest {
    /// Compute the mean error of a genome over the dataset.
    Evaluate { task: TaskId, creature: String },
    /// Train a genome and return it with its error before and after.
    Train {
        task: TaskId,
        creature: String,
        config: TrainConfig,
    },
    /// Liveness check.
    Echo { task: TaskId, payload: String },
    /// Stop the worker.
    Terminate,
}

/// Messages sent back by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerResponse {
    Evaluated {
        task: TaskId,
        worker: usize,
        error: f32,
    },
    Trained {
        task: TaskId,
        worker: usize,
        creature: String,
        before: f32,
        after: f32,
    },
    Echo {
        task: TaskId,
        worker: usize,
        payload: String,
    },
    Failed {
        task: TaskId,
        worker: usize,
        kind: TaskKind,
        message: String,
    },
}

impl WorkerResponse {
    /// Task this response answers.
    #[must_use]
    pub fn task(&self) -> TaskId {
        match self {
            Self::Evaluated { task, .. }
            | Self::Trained { task, .. }
            | Self::Echo { task, .. }
            | Self::Failed { task, .. } => *task,
        }
    }
}

/// Worker and protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,
    #[error("failed to spawn worker {id}: {source}")]
    Spawn {
        id: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("worker {0} does not exist")]
    NoSuchWorker(usize),
    #[error("worker {0} disconnected")]
    Disconnected(usize),
    #[error("all workers disconnected")]
    ChannelClosed,
    #[error("response for task {0} that was never dispatched")]
    UnknownTask(TaskId),
    #[error("malformed genome message: {0}")]
    Message(#[from] serde_json::Error),
    #[error(transparent)]
    DataSet(#[from] DataSetError),
    #[error(transparent)]
    Creature(#[from] CreatureError),
}

/// What a dispatched task asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Evaluate,
    Train,
    Echo,
}

/// Handle to one worker thread.
#[derive(Debug)]
struct Worker {
    id: usize,
    requests: Sender<WorkerRequest>,
    busy: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        dataset: DataSetDir,
        cost: Cost,
        responses: Sender<WorkerResponse>,
    ) -> Result<Self, WorkerError> {
        let (requests, inbox) = channel::unbounded();
        let busy = Arc::new(AtomicUsize::new(0));
        let busy_clone = Arc::clone(&busy);

        let handle = thread::Builder::new()
            .name(format!("creature-worker-{id}"))
            .spawn(move || run_worker(id, &inbox, &responses, &busy_clone, &dataset, cost))
            .map_err(|source| WorkerError::Spawn { id, source })?;

        log::debug!("spawned worker {id}");
        Ok(Self {
            id,
            requests,
            busy,
            handle: Some(handle),
        })
    }

    fn send(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.busy.fetch_add(1, Ordering::SeqCst);
        self.requests.send(request).map_err(|_| {
            self.busy.fetch_sub(1, Ordering::SeqCst);
            WorkerError::Disconnected(self.id)
        })
    }

    fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        let _ = self.requests.send(WorkerRequest::Terminate);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("worker {} panicked", self.id);
            }
        }
    }
}

fn run_worker(
    id: usize,
    inbox: &Receiver<WorkerRequest>,
    responses: &Sender<WorkerResponse>,
    busy: &AtomicUsize,
    dataset: &DataSetDir,
    cost: Cost,
) {
    for request in inbox.iter() {
        let response = match request {
            WorkerRequest::Terminate => break,
            WorkerRequest::Echo { task, payload } => WorkerResponse::Echo {
                task,
                worker: id,
                payload,
            },
            WorkerRequest::Evaluate { task, creature } => {
                match evaluate_job(&creature, dataset, cost) {
                    Ok(error) => WorkerResponse::Evaluated {
                        task,
                        worker: id,
                        error,
                    },
                    Err(e) => failed(id, task, TaskKind::Evaluate, &e),
                }
            }
            WorkerRequest::Train {
                task,
                creature,
                config,
            } => match train_job(&creature, &config, dataset, cost) {
                Ok((creature, before, after)) => WorkerResponse::Trained {
                    task,
                    worker: id,
                    creature,
                    before,
                    after,
                },
                Err(e) => failed(id, task, TaskKind::Train, &e),
            },
        };
        busy.fetch_sub(1, Ordering::SeqCst);
        if responses.send(response).is_err() {
            break;
        }
    }
    log::debug!("worker {id} stopped");
}

fn failed(worker: usize, task: TaskId, kind: TaskKind, error: &WorkerError) -> WorkerResponse {
    log::error!("worker {worker} failed {kind:?} task {task}: {error}");
    WorkerResponse::Failed {
        task,
        worker,
        kind,
        message: error.to_string(),
    }
}

/// Mean untraced error of `network` over the whole dataset.
fn dataset_error(network: &mut Network, dataset: &DataSetDir, cost: Cost) -> Result<f32, WorkerError> {
    network.clear();
    let mut outputs = vec![0.0; network.num_outputs()];
    let mut total = 0.0;
    let count = dataset.for_each_sample(|sample| {
        network.activate_into(&sample.input, &mut outputs, false);
        total += cost.calculate(&sample.output, &outputs);
    })?;
    Ok(if count == 0 { 0.0 } else { total / count as f32 })
}

fn check_shape(creature: &Creature, dataset: &DataSetDir) -> Result<(), WorkerError> {
    if creature.input_count() != dataset.input_size()
        || creature.output_count() != dataset.output_size()
    {
        return Err(WorkerError::Creature(CreatureError::Invalid(format!(
            "creature is {}x{} but dataset is {}x{}",
            creature.input_count(),
            creature.output_count(),
            dataset.input_size(),
            dataset.output_size()
        ))));
    }
    Ok(())
}

fn evaluate_job(json: &str, dataset: &DataSetDir, cost: Cost) -> Result<f32, WorkerError> {
    let creature: Creature = serde_json::from_str(json)?;
    check_shape(&creature, dataset)?;
    let mut network = Network::new(&creature);
    dataset_error(&mut network, dataset, cost)
}

fn train_job(
    json: &str,
    config: &TrainConfig,
    dataset: &DataSetDir,
    cost: Cost,
) -> Result<(String, f32, f32), WorkerError> {
    let mut creature: Creature = serde_json::from_str(json)?;
    check_shape(&creature, dataset)?;
    let mut network = Network::new(&creature);
    let before = dataset_error(&mut network, dataset, cost)?;

    let batch = config.batch_size.max(1);
    for _ in 0..config.epochs.max(1) {
        network.clear();
        let mut seen = 0usize;
        for index in 0..dataset.partitions().len() {
            for sample in dataset.load(index)? {
                seen += 1;
                network.train_sample(&sample, config, cost, seen % batch == 0);
            }
        }
        if seen % batch != 0 {
            network.commit(config.momentum);
        }
    }

    let after = dataset_error(&mut network, dataset, cost)?;
    network.write_back(&mut creature)?;
    creature.score = None;
    Ok((serde_json::to_string(&creature)?, before, after))
}

/// A trained genome returned by a worker.
#[derive(Debug, Clone)]
pub struct Trained {
    pub task: TaskId,
    pub creature: Creature,
    /// Dataset error before training.
    pub before: f32,
    /// Dataset error after training.
    pub after: f32,
}

/// A fixed set of worker threads.
///
/// Dropping the pool terminates and joins every worker.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    responses: Receiver<WorkerResponse>,
    next_task: TaskId,
    pending: HashMap<TaskId, (usize, TaskKind)>,
    /// Answers to training tasks, held until [`WorkerPool::collect_trained`].
    trained: Vec<WorkerResponse>,
    /// Other answers that arrived while the caller was waiting for something
    /// else; [`WorkerPool::recv`] hands these out first.
    backlog: VecDeque<WorkerResponse>,
}

impl WorkerPool {
    /// Spawn `count` workers bound to `dataset` and `cost`.
    pub fn new(count: usize, dataset: &DataSetDir, cost: Cost) -> Result<Self, WorkerError> {
        if count == 0 {
            return Err(WorkerError::NoWorkers);
        }
        let (sender, responses) = channel::unbounded();
        let workers = (0..count)
            .map(|id| Worker::spawn(id, dataset.clone(), cost, sender.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            workers,
            responses,
            next_task: 0,
            pending: HashMap::new(),
            trained: Vec::new(),
            backlog: VecDeque::new(),
        })
    }

    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Outstanding tasks on worker `id`.
    #[must_use]
    pub fn busy(&self, id: usize) -> usize {
        self.workers.get(id).map_or(0, Worker::busy)
    }

    /// First worker with nothing outstanding.
    #[must_use]
    pub fn idle_worker(&self) -> Option<usize> {
        self.workers.iter().position(|w| w.busy() == 0)
    }

    /// Tasks dispatched and not yet answered.
    #[must_use]
    pub fn in_flight(&self, kind: TaskKind) -> usize {
        self.pending.values().filter(|(_, k)| *k == kind).count()
    }

    fn dispatch(
        &mut self,
        worker: usize,
        kind: TaskKind,
        build: impl FnOnce(TaskId) -> WorkerRequest,
    ) -> Result<TaskId, WorkerError> {
        let handle = self
            .workers
            .get(worker)
            .ok_or(WorkerError::NoSuchWorker(worker))?;
        let task = self.next_task;
        self.next_task += 1;
        handle.send(build(task))?;
        self.pending.insert(task, (worker, kind));
        log::debug!("dispatched {kind:?} task {task} to worker {worker}");
        Ok(task)
    }

    /// Ask `worker` to evaluate `creature`.
    pub fn evaluate(&mut self, worker: usize, creature: &Creature) -> Result<TaskId, WorkerError> {
        let json = serde_json::to_string(creature)?;
        self.dispatch(worker, TaskKind::Evaluate, |task| WorkerRequest::Evaluate {
            task,
            creature: json,
        })
    }

    /// Ask `worker` to train `creature` in the background.
    pub fn train(
        &mut self,
        worker: usize,
        creature: &Creature,
        config: &TrainConfig,
    ) -> Result<TaskId, WorkerError> {
        let json = serde_json::to_string(creature)?;
        let config = config.clone();
        self.dispatch(worker, TaskKind::Train, |task| WorkerRequest::Train {
            task,
            creature: json,
            config,
        })
    }

    /// Round-trip `payload` through `worker`.
    pub fn echo(&mut self, worker: usize, payload: &str) -> Result<String, WorkerError> {
        let task = self.dispatch(worker, TaskKind::Echo, |task| WorkerRequest::Echo {
            task,
            payload: payload.to_string(),
        })?;
        loop {
            match self.recv_channel()? {
                WorkerResponse::Echo {
                    task: t, payload, ..
                } if t == task => return Ok(payload),
                other => self.stash(other),
            }
        }
    }

    /// Next response, checking it against the dispatch table.
    ///
    /// Stashed non-training responses come first. Training responses are
    /// returned like any other; callers that are not interested in them
    /// hand them to [`WorkerPool::stash`].
    pub fn recv(&mut self) -> Result<WorkerResponse, WorkerError> {
        match self.backlog.pop_front() {
            Some(response) => Ok(response),
            None => self.recv_channel(),
        }
    }

    fn recv_channel(&mut self) -> Result<WorkerResponse, WorkerError> {
        let response = self
            .responses
            .recv()
            .map_err(|_| WorkerError::ChannelClosed)?;
        let task = response.task();
        if self.pending.remove(&task).is_none() {
            return Err(WorkerError::UnknownTask(task));
        }
        Ok(response)
    }

    /// Set aside a response the caller is not waiting for.
    ///
    /// Training answers go to [`WorkerPool::collect_trained`], everything
    /// else back to [`WorkerPool::recv`].
    pub fn stash(&mut self, response: WorkerResponse) {
        match response {
            WorkerResponse::Trained { .. }
            | WorkerResponse::Failed {
                kind: TaskKind::Train,
                ..
            } => self.trained.push(response),
            other => self.backlog.push_back(other),
        }
    }

    /// Wait for every outstanding training task and return the results.
    ///
    /// Failed or malformed results are logged and skipped.
    pub fn collect_trained(&mut self) -> Result<Vec<Trained>, WorkerError> {
        while self.in_flight(TaskKind::Train) > 0 {
            let response = self.recv_channel()?;
            self.stash(response);
        }

        let mut out = Vec::with_capacity(self.trained.len());
        for response in self.trained.drain(..) {
            match response {
                WorkerResponse::Trained {
                    task,
                    creature,
                    before,
                    after,
                    ..
                } => match serde_json::from_str::<Creature>(&creature) {
                    Ok(creature) => out.push(Trained {
                        task,
                        creature,
                        before,
                        after,
                    }),
                    Err(e) => log::error!("trained genome for task {task} is malformed: {e}"),
                },
                WorkerResponse::Failed {
                    task,
                    worker,
                    message,
                    ..
                } => log::error!("training task {task} failed on worker {worker}: {message}"),
                other => self.backlog.push_back(other),
            }
        }
        Ok(out)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{partition, Sample};
    use crate::genome::CreatureConfig;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn dataset(dir: &std::path::Path) -> DataSetDir {
        let samples: Vec<Sample> = (0..12)
            .map(|i| {
                let x = i as f32 / 12.0;
                Sample::new(vec![x, 1.0 - x], vec![x])
            })
            .collect();
        DataSetDir::open(partition(&samples, dir, 5).unwrap()).unwrap()
    }

    #[test]
    fn test_echo_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pool = WorkerPool::new(2, &dataset(tmp.path()), Cost::Mse).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.echo(1, "ping").unwrap(), "ping");
        assert_eq!(pool.busy(1), 0);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            WorkerPool::new(0, &dataset(tmp.path()), Cost::Mse),
            Err(WorkerError::NoWorkers)
        ));
    }

    #[test]
    fn test_evaluate_matches_local_error() {
        let tmp = tempfile::tempdir().unwrap();
        let data = dataset(tmp.path());
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let creature = Creature::new(&CreatureConfig::linear(2, 1), &mut rng);

        let mut local = 0.0;
        let count = data
            .for_each_sample(|s| local += Cost::Mse.calculate(&s.output, &creature.evaluate(&s.input)))
            .unwrap();
        local /= count as f32;

        let mut pool = WorkerPool::new(1, &data, Cost::Mse).unwrap();
        let task = pool.evaluate(0, &creature).unwrap();
        match pool.recv().unwrap() {
            WorkerResponse::Evaluated { task: t, error, .. } => {
                assert_eq!(t, task);
                assert!((error - local).abs() < 1e-5);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_shape_mismatch_fails_task() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let creature = Creature::new(&CreatureConfig::new(3, 1), &mut rng);
        let mut pool = WorkerPool::new(1, &dataset(tmp.path()), Cost::Mse).unwrap();
        pool.evaluate(0, &creature).unwrap();
        assert!(matches!(
            pool.recv().unwrap(),
            WorkerResponse::Failed {
                kind: TaskKind::Evaluate,
                ..
            }
        ));
    }

    #[test]
    fn test_echo_keeps_earlier_responses() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let creature = Creature::new(&CreatureConfig::linear(2, 1), &mut rng);
        let mut pool = WorkerPool::new(1, &dataset(tmp.path()), Cost::Mse).unwrap();

        // One worker answers in order, so the evaluation arrives before the echo.
        let task = pool.evaluate(0, &creature).unwrap();
        assert_eq!(pool.echo(0, "ping").unwrap(), "ping");
        assert_eq!(pool.in_flight(TaskKind::Evaluate), 0);
        match pool.recv().unwrap() {
            WorkerResponse::Evaluated { task: t, .. } => assert_eq!(t, task),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_collect_trained_keeps_evaluations() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let creature = Creature::new(&CreatureConfig::linear(2, 1), &mut rng);
        let mut pool = WorkerPool::new(1, &dataset(tmp.path()), Cost::Mse).unwrap();

        let evaluation = pool.evaluate(0, &creature).unwrap();
        pool.train(0, &creature, &TrainConfig::default()).unwrap();
        assert_eq!(pool.collect_trained().unwrap().len(), 1);
        assert_eq!(pool.recv().unwrap().task(), evaluation);
    }

    #[test]
    fn test_background_training_improves() {
        let tmp = tempfile::tempdir().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let creature = Creature::new(&CreatureConfig::linear(2, 1), &mut rng);
        let mut pool = WorkerPool::new(2, &dataset(tmp.path()), Cost::Mse).unwrap();
        let config = TrainConfig {
            rate: 0.05,
            epochs: 20,
            ..Default::default()
        };
        pool.train(0, &creature, &config).unwrap();
        let trained = pool.collect_trained().unwrap();
        assert_eq!(trained.len(), 1);
        assert!(trained[0].after < trained[0].before);
        assert_eq!(trained[0].creature.node_count(), creature.node_count());
    }
}
