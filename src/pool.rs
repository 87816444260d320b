// src/pool.rs

//! Phase worker pools
//!
//! Work items are queued up front, then a background thread drives a rayon
//! pool of fixed size over them. Items have no ordering guarantee relative
//! to each other. The first failing item fails the pool; a panicking
//! worker is reported as [`Error::Worker`] instead of tearing down the
//! process.

use crate::error::{Error, Result};
use rayon::prelude::*;
use std::any::Any;
use std::thread::JoinHandle;
use tracing::debug;

pub struct WorkerPool<T> {
    name: String,
    workers: usize,
    queue: Vec<T>,
    handle: Option<JoinHandle<Result<()>>>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

impl<T: Send + Sync + 'static> WorkerPool<T> {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            queue: Vec::new(),
            handle: None,
        }
    }

    pub fn queue_put(&mut self, item: T) {
        self.queue.push(item);
    }

    pub fn queue_total(&self) -> usize {
        self.queue.len()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start processing the queue; `process` gets the item and its 1-based
    /// position in the queue
    pub fn start<F>(&mut self, process: F) -> Result<()>
    where
        F: Fn(&T, usize) -> Result<()> + Send + Sync + 'static,
    {
        if self.handle.is_some() {
            return Err(Error::Worker {
                pool: self.name.clone(),
                reason: "pool already started".to_string(),
            });
        }
        let items = std::mem::take(&mut self.queue);
        let name = self.name.clone();
        let workers = self.workers;
        debug!("Starting pool {} with {} workers and {} items", name, workers, items.len());

        let handle = std::thread::Builder::new()
            .name(format!("pool-{}", name))
            .spawn(move || {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name({
                        let name = name.clone();
                        move |i| format!("{}-{}", name, i)
                    })
                    .build()
                    .map_err(|e| Error::Worker {
                        pool: name.clone(),
                        reason: e.to_string(),
                    })?;
                pool.install(|| {
                    items
                        .par_iter()
                        .enumerate()
                        .try_for_each(|(num, item)| process(item, num + 1))
                })
            })
            .map_err(Error::Io)?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Wait for the queue to drain; calling it again is a no-op
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(payload) => Err(Error::Worker {
                pool: self.name.clone(),
                reason: panic_message(payload),
            }),
        }
    }

    /// `start` followed by `stop`
    pub fn run<F>(&mut self, process: F) -> Result<()>
    where
        F: Fn(&T, usize) -> Result<()> + Send + Sync + 'static,
    {
        self.start(process)?;
        self.stop()
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
