use std::collections::BTreeMap;

use anyhow::Result;
use crossbeam::channel::{bounded, Receiver, Sender};
use crossbeam::thread::scope;

/// Create and execute a worker pool.
///
/// Items flow preprocessor -> workers -> postprocessor; the postprocessor
/// receives results in the order the preprocessor emitted the corresponding
/// inputs, regardless of which worker finished first.
///
/// # Arguments
/// * `preprocessor` - Closure that feeds work items into the pool.
/// * `workers` - Closures that execute the work.
/// * `postprocessor` - Closure that consumes results in input order.
pub(crate) fn worker_pool<Pre, Workers, W, Post, U, T>(
    preprocessor: Pre,
    workers: Workers,
    postprocessor: Post,
    in_capacity: usize,
    out_capacity: usize,
) -> Result<()>
where
    Pre: FnOnce(Sender<U>) -> Result<()> + Send,
    Workers: Iterator<Item = W>,
    W: FnOnce(Receiver<U>, Sender<Box<T>>) -> Result<()> + Send,
    Post: FnMut(Box<T>) -> Result<()> + Send,
    U: Send,
    T: Send + Orderable,
{
    scope(|scope| -> Result<()> {
        let (in_sender, in_receiver) = bounded(in_capacity);
        let (out_sender, out_receiver) = bounded(out_capacity);

        let preprocessor = scope.spawn(move |_| {
            // in_sender is moved in and dropped on return, which tells the
            // workers that the input is exhausted
            preprocessor(in_sender)
        });

        let workers: Vec<_> = workers
            .map(|worker: W| {
                let in_receiver = in_receiver.clone();
                let out_sender = out_sender.clone();
                scope.spawn(move |_| worker(in_receiver, out_sender))
            })
            .collect();
        drop(in_receiver);
        drop(out_sender);

        let postprocessor = scope.spawn(move |_| -> Result<()> {
            let mut postprocessor = postprocessor;
            let mut items = OrderedContainer::new();
            let mut last_index = None;

            for item in out_receiver {
                items.insert(item.index(), item);

                // Find continuous prefix, postprocess in order.
                for item in items.remove_continuous_prefix(&mut last_index) {
                    postprocessor(item)?;
                }
            }

            Ok(())
        });

        let mut errors = Vec::new();

        let ret = postprocessor.join().unwrap();
        if ret.is_err() {
            errors.push(ret);
        }

        for worker in workers {
            let ret = worker.join().unwrap();
            if ret.is_err() {
                errors.push(ret);
            }
        }

        let ret = preprocessor.join().unwrap();
        if ret.is_err() {
            errors.push(ret);
        }

        match errors.into_iter().next() {
            Some(err) => err,
            None => Ok(()),
        }
    })
    .unwrap()?;

    Ok(())
}

pub(crate) trait Orderable {
    fn index(&self) -> usize;
}

struct OrderedContainer<T> {
    inner: BTreeMap<usize, Box<T>>,
}

impl<T> OrderedContainer<T>
where
    T: Orderable,
{
    fn new() -> Self {
        OrderedContainer {
            inner: BTreeMap::new(),
        }
    }

    fn insert(&mut self, key: usize, value: Box<T>) {
        self.inner.insert(key, value);
    }

    fn remove_continuous_prefix(&mut self, last_idx: &mut Option<usize>) -> Vec<Box<T>> {
        let mut items = Vec::new();

        loop {
            let next = match last_idx {
                None => 0,
                Some(i) => *i + 1,
            };
            match self.inner.remove(&next) {
                Some(item) => {
                    items.push(item);
                    last_idx.replace(next);
                }
                None => break,
            }
        }

        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item {
        index: usize,
        value: usize,
    }

    impl Orderable for Item {
        fn index(&self) -> usize {
            self.index
        }
    }

    #[test]
    fn test_worker_pool_preserves_order() {
        let collected = std::sync::Mutex::new(Vec::new());

        worker_pool(
            |sender| {
                for i in 0..64 {
                    sender.send(i).unwrap();
                }
                Ok(())
            },
            (0..4).map(|_| {
                |receiver: Receiver<usize>, sender: Sender<Box<Item>>| -> Result<()> {
                    for i in receiver {
                        sender
                            .send(Box::new(Item {
                                index: i,
                                value: i * 2,
                            }))
                            .unwrap();
                    }
                    Ok(())
                }
            }),
            |item: Box<Item>| {
                collected.lock().unwrap().push(item.value);
                Ok(())
            },
            8,
            8,
        )
        .unwrap();

        let collected = collected.into_inner().unwrap();
        assert_eq!(collected, (0..64).map(|i| i * 2).collect::<Vec<_>>());
    }
}
