//! Multi-threaded search variants.
//!
//! Chain evaluation is pure modular exponentiation, token derivation is a
//! pair of MACs, and the store lookup may fault a page in -- three workloads
//! that overlap profitably. Every variant here returns the same multiset as
//! the sequential walk; only the scheduling differs:
//!
//! * [`Server::search_parallel_full`] -- evaluator threads feed a
//!   three-stage pipeline (derive → lookup → unmask) chained by hand-off
//!   queues.
//! * [`Server::search_parallel`] -- evaluator threads feed a pool of access
//!   workers that each do derive, lookup and unmask inline.
//! * [`Server::search_parallel_light`] -- no queues at all: each thread owns
//!   the chain positions congruent to its lane and does everything inline.
//! * The `_callback` forms replace the collected result list with a caller
//!   callback, optionally invoked from its own worker pool.
//!
//! Result order is unspecified in all of them. Each variant opens a single
//! read transaction up front, keeps it for the whole search, joins every
//! worker it spawned, and commits the transaction before returning.

use std::num::NonZeroUsize;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Mutex, PoisonError};
use std::thread;
use tracing::error;

use super::Server;
use crate::prf::Prf;
use crate::request::{derive_mask_word, derive_update_token, SearchRequest};
use crate::tdp::Tdp;
use crate::token::{SearchToken, UpdateToken, UPDATE_TOKEN_SIZE};

/// Worker counts for the three stages of
/// [`Server::search_parallel_full_with`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineWidths {
    /// Token-derivation (PRF) workers.
    pub derive: usize,
    /// Store-lookup workers.
    pub lookup: usize,
    /// Unmask-and-emit workers.
    pub unmask: usize,
}

impl Default for PipelineWidths {
    fn default() -> Self {
        PipelineWidths {
            derive: 1,
            lookup: 1,
            unmask: 1,
        }
    }
}

impl Server {
    /// Pipelined search with the default stage widths.
    #[must_use]
    pub fn search_parallel_full(&self, req: &SearchRequest) -> Vec<u64> {
        self.search_parallel_full_with(req, PipelineWidths::default())
    }

    /// Pipelined search: evaluator threads (hardware concurrency minus the
    /// three stages, at least one) push tokens through derive, lookup and
    /// unmask stages connected by queues.
    #[must_use]
    pub fn search_parallel_full_with(
        &self,
        req: &SearchRequest,
        widths: PipelineWidths,
    ) -> Vec<u64> {
        let keyword_prf = Prf::<UPDATE_TOKEN_SIZE>::new(&req.derivation_key);
        let txn = self.edb.ro_transaction();
        let results = Mutex::new(Vec::new());
        let lanes = eval_thread_count(3);

        let (derive_tx, derive_rx) = mpsc::channel::<(u64, SearchToken)>();
        let (lookup_tx, lookup_rx) = mpsc::channel::<(u64, SearchToken, UpdateToken)>();
        let (unmask_tx, unmask_rx) = mpsc::channel::<(SearchToken, u64)>();
        let derive_rx = Mutex::new(derive_rx);
        let lookup_rx = Mutex::new(lookup_rx);
        let unmask_rx = Mutex::new(unmask_rx);

        thread::scope(|s| {
            for _ in 0..widths.derive.max(1) {
                let lookup_tx = lookup_tx.clone();
                let derive_rx = &derive_rx;
                let keyword_prf = &keyword_prf;
                s.spawn(move || {
                    while let Some((j, st)) = recv_shared(derive_rx) {
                        let token = derive_update_token(keyword_prf, &st);
                        if lookup_tx.send((j, st, token)).is_err() {
                            break;
                        }
                    }
                });
            }

            for _ in 0..widths.lookup.max(1) {
                let unmask_tx = unmask_tx.clone();
                let lookup_rx = &lookup_rx;
                let txn = &txn;
                s.spawn(move || {
                    while let Some((j, st, token)) = recv_shared(lookup_rx) {
                        match txn.get(&token) {
                            Some(masked) => {
                                if unmask_tx.send((st, masked)).is_err() {
                                    break;
                                }
                            }
                            None => {
                                error!("expected to find a value for the {j}-th derived token")
                            }
                        }
                    }
                });
            }

            for _ in 0..widths.unmask.max(1) {
                let unmask_rx = &unmask_rx;
                let keyword_prf = &keyword_prf;
                let results = &results;
                s.spawn(move || {
                    while let Some((st, masked)) = recv_shared(unmask_rx) {
                        let index = masked ^ derive_mask_word(keyword_prf, &st);
                        results
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(index);
                    }
                });
            }

            for lane in 0..lanes {
                let derive_tx = derive_tx.clone();
                let tdp = &self.tdp;
                let start = &req.token;
                let add_count = req.add_count;
                s.spawn(move || {
                    walk_chain(tdp, start, lane, lanes, add_count, |j, st| {
                        let _ = derive_tx.send((j, st));
                    });
                });
            }

            drop(derive_tx);
            drop(lookup_tx);
            drop(unmask_tx);
        });

        txn.commit();
        results.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pool search: evaluator threads (hardware concurrency minus
    /// `access_threads`, at least one) feed `access_threads` workers that
    /// derive, look up and unmask inline, sharing one result list.
    #[must_use]
    pub fn search_parallel(&self, req: &SearchRequest, access_threads: usize) -> Vec<u64> {
        let access_threads = access_threads.max(1);
        let keyword_prf = Prf::<UPDATE_TOKEN_SIZE>::new(&req.derivation_key);
        let txn = self.edb.ro_transaction();
        let results = Mutex::new(Vec::new());
        let lanes = eval_thread_count(access_threads);

        let (token_tx, token_rx) = mpsc::channel::<(u64, SearchToken)>();
        let token_rx = Mutex::new(token_rx);

        thread::scope(|s| {
            for _ in 0..access_threads {
                let token_rx = &token_rx;
                let keyword_prf = &keyword_prf;
                let txn = &txn;
                let results = &results;
                s.spawn(move || {
                    while let Some((j, st)) = recv_shared(token_rx) {
                        let token = derive_update_token(keyword_prf, &st);
                        match txn.get(&token) {
                            Some(masked) => {
                                let index = masked ^ derive_mask_word(keyword_prf, &st);
                                results
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .push(index);
                            }
                            None => {
                                error!("expected to find a value for the {j}-th derived token")
                            }
                        }
                    }
                });
            }

            for lane in 0..lanes {
                let token_tx = token_tx.clone();
                let tdp = &self.tdp;
                let start = &req.token;
                let add_count = req.add_count;
                s.spawn(move || {
                    walk_chain(tdp, start, lane, lanes, add_count, |j, st| {
                        let _ = token_tx.send((j, st));
                    });
                });
            }

            drop(token_tx);
        });

        txn.commit();
        results.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sharded search: `threads` threads, each walking the chain positions
    /// congruent to its lane id and doing derivation, lookup and unmasking
    /// inline. No queues; the only shared state is the result list.
    #[must_use]
    pub fn search_parallel_light(&self, req: &SearchRequest, threads: usize) -> Vec<u64> {
        let threads = threads.max(1);
        let keyword_prf = Prf::<UPDATE_TOKEN_SIZE>::new(&req.derivation_key);
        let txn = self.edb.ro_transaction();
        let results = Mutex::new(Vec::new());

        thread::scope(|s| {
            for lane in 0..threads {
                let keyword_prf = &keyword_prf;
                let txn = &txn;
                let results = &results;
                let tdp = &self.tdp;
                let start = &req.token;
                let add_count = req.add_count;
                s.spawn(move || {
                    walk_chain(tdp, start, lane, threads, add_count, |j, st| {
                        let token = derive_update_token(keyword_prf, &st);
                        match txn.get(&token) {
                            Some(masked) => {
                                let index = masked ^ derive_mask_word(keyword_prf, &st);
                                results
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .push(index);
                            }
                            None => {
                                error!("expected to find a value for the {j}-th derived token")
                            }
                        }
                    });
                });
            }
        });

        txn.commit();
        results.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// As [`Server::search_parallel`], but matches are handed to `callback`
    /// from a pool of `post_threads` workers instead of being collected.
    pub fn search_parallel_callback(
        &self,
        req: &SearchRequest,
        callback: impl Fn(u64) + Send + Sync,
        eval_threads: usize,
        access_threads: usize,
        post_threads: usize,
    ) {
        let keyword_prf = Prf::<UPDATE_TOKEN_SIZE>::new(&req.derivation_key);
        let txn = self.edb.ro_transaction();
        let lanes = eval_threads.max(1);

        let (token_tx, token_rx) = mpsc::channel::<(u64, SearchToken)>();
        let (post_tx, post_rx) = mpsc::channel::<u64>();
        let token_rx = Mutex::new(token_rx);
        let post_rx = Mutex::new(post_rx);
        let callback = &callback;

        thread::scope(|s| {
            for _ in 0..post_threads.max(1) {
                let post_rx = &post_rx;
                s.spawn(move || {
                    while let Some(index) = recv_shared(post_rx) {
                        callback(index);
                    }
                });
            }

            for _ in 0..access_threads.max(1) {
                let post_tx = post_tx.clone();
                let token_rx = &token_rx;
                let keyword_prf = &keyword_prf;
                let txn = &txn;
                s.spawn(move || {
                    while let Some((j, st)) = recv_shared(token_rx) {
                        let token = derive_update_token(keyword_prf, &st);
                        match txn.get(&token) {
                            Some(masked) => {
                                let index = masked ^ derive_mask_word(keyword_prf, &st);
                                if post_tx.send(index).is_err() {
                                    break;
                                }
                            }
                            None => {
                                error!("expected to find a value for the {j}-th derived token")
                            }
                        }
                    }
                });
            }

            for lane in 0..lanes {
                let token_tx = token_tx.clone();
                let tdp = &self.tdp;
                let start = &req.token;
                let add_count = req.add_count;
                s.spawn(move || {
                    walk_chain(tdp, start, lane, lanes, add_count, |j, st| {
                        let _ = token_tx.send((j, st));
                    });
                });
            }

            drop(token_tx);
            drop(post_tx);
        });

        txn.commit();
    }

    /// As [`Server::search_parallel_light`], but each shard hands its
    /// matches straight to `callback`, which must therefore tolerate
    /// concurrent invocation.
    pub fn search_parallel_light_callback(
        &self,
        req: &SearchRequest,
        callback: impl Fn(u64) + Send + Sync,
        threads: usize,
    ) {
        let threads = threads.max(1);
        let keyword_prf = Prf::<UPDATE_TOKEN_SIZE>::new(&req.derivation_key);
        let txn = self.edb.ro_transaction();
        let callback = &callback;

        thread::scope(|s| {
            for lane in 0..threads {
                let keyword_prf = &keyword_prf;
                let txn = &txn;
                let tdp = &self.tdp;
                let start = &req.token;
                let add_count = req.add_count;
                s.spawn(move || {
                    walk_chain(tdp, start, lane, threads, add_count, |j, st| {
                        let token = derive_update_token(keyword_prf, &st);
                        match txn.get(&token) {
                            Some(masked) => callback(masked ^ derive_mask_word(keyword_prf, &st)),
                            None => {
                                error!("expected to find a value for the {j}-th derived token")
                            }
                        }
                    });
                });
            }
        });

        txn.commit();
    }
}

/// Visit every chain position `j ≡ lane (mod lanes)` below `add_count`,
/// stepping the token by `lanes` forward evaluations between visits.
fn walk_chain(
    tdp: &Tdp,
    start: &SearchToken,
    lane: usize,
    lanes: usize,
    add_count: u64,
    mut visit: impl FnMut(u64, SearchToken),
) {
    let mut j = lane as u64;
    if j >= add_count {
        return;
    }

    let mut st = if lane == 0 {
        start.clone()
    } else {
        tdp.eval_pow(start, lane as u32)
    };

    loop {
        visit(j, st.clone());
        j += lanes as u64;
        if j >= add_count {
            return;
        }
        st = tdp.eval_pow(&st, lanes as u32);
    }
}

fn recv_shared<T>(rx: &Mutex<Receiver<T>>) -> Option<T> {
    rx.lock().unwrap_or_else(PoisonError::into_inner).recv().ok()
}

fn eval_thread_count(reserved: usize) -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
        .saturating_sub(reserved)
        .max(1)
}
