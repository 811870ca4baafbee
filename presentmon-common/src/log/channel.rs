// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::log::component::Component;
use crate::log::panic::panic_log;
use crate::log::{ChannelObject, Driver, Entry, Policy};

/// Single-use signal carried by a control packet. The submitter blocks on
/// the paired receiver until the worker has processed the packet, which
/// gives in-order semantics with respect to all previously enqueued entries.
struct ControlPacket {
    done: Sender<()>,
}

impl ControlPacket {
    fn new() -> (Self, Receiver<()>) {
        let (done, wait) = crossbeam_channel::bounded(1);
        (Self { done }, wait)
    }

    fn release(self) {
        let _ = self.done.send(());
    }
}

enum QueueElement {
    Entry(Entry),
    Flush(ControlPacket),
    Kill(ControlPacket),
    FlushEntryPointExit(ControlPacket),
}

/// Attachment order is preserved within each capability; the worker is the
/// only thread that runs policies, the resolver, and drivers.
#[derive(Default)]
struct Attachments {
    drivers: Vec<Box<dyn Driver>>,
    policies: Vec<Box<dyn Policy>>,
    // lifetime anchors only; nothing dispatches to them
    #[allow(dead_code)]
    objects: Vec<Box<dyn ChannelObject>>,
    resolving_traces: bool,
}

impl Attachments {
    fn attach(&mut self, component: Component) {
        match component {
            Component::Driver(d) => self.drivers.push(d),
            Component::Policy(p) => self.policies.push(p),
            Component::Object(o) => self.objects.push(o),
        }
    }

    fn flush_drivers(&mut self) {
        for driver in &mut self.drivers {
            driver.flush();
        }
    }

    fn process(&mut self, mut entry: Entry) {
        for policy in &mut self.policies {
            match catch_unwind(AssertUnwindSafe(|| policy.transform_filter(&mut entry))) {
                Ok(true) => {}
                // first drop ends propagation
                Ok(false) => return,
                Err(payload) => panic_log(format!(
                    "policy panicked in logging channel: {}",
                    describe_panic(payload.as_ref())
                )),
            }
        }
        if let Some(trace) = entry.trace.as_deref_mut() {
            if !trace.resolved() && self.resolving_traces {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| trace.resolve())) {
                    panic_log(format!(
                        "trace resolution panicked in logging channel: {}",
                        describe_panic(payload.as_ref())
                    ));
                }
            }
        }
        for driver in &mut self.drivers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| driver.submit(&entry))) {
                panic_log(format!(
                    "driver panicked in logging channel: {}",
                    describe_panic(payload.as_ref())
                ));
            }
        }
        if self.drivers.is_empty() {
            panic_log("no drivers in logging channel while processing entry");
        }
    }
}

fn describe_panic(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

/// Asynchronous multi-sink logging channel.
///
/// `submit` is safe from many threads concurrently and never blocks beyond
/// the queue enqueue; `flush`, `attach_component` and
/// `flush_entry_point_exit` block until the worker has caught up. Dropping
/// the channel enqueues a kill packet without waiting and then joins the
/// worker, which drains the queue up to and including the kill.
pub struct Channel {
    queue: Sender<QueueElement>,
    attachments: Arc<Mutex<Attachments>>,
    worker: Option<JoinHandle<()>>,
}

impl Channel {
    pub fn new(components: Vec<Component>) -> Self {
        let (queue, receiver) = crossbeam_channel::unbounded();
        let attachments = Arc::new(Mutex::new(Attachments {
            resolving_traces: true,
            ..Attachments::default()
        }));
        for component in components {
            attachments.lock().unwrap().attach(component);
        }
        let worker_attachments = Arc::clone(&attachments);
        let worker = std::thread::Builder::new()
            .name("log-chan".into())
            .spawn(move || worker_loop(receiver, worker_attachments))
            .expect("failed to spawn logging channel worker");
        Self {
            queue,
            attachments,
            worker: Some(worker),
        }
    }

    /// Enqueues an entry for processing. Infallible by contract; a failed
    /// enqueue is routed to the panic logger.
    pub fn submit(&self, entry: Entry) {
        if self.queue.send(QueueElement::Entry(entry)).is_err() {
            panic_log("failed to enqueue entry in logging channel");
        }
    }

    /// Blocks until every previously submitted entry has been delivered to
    /// every driver and all drivers have flushed.
    pub fn flush(&self) {
        self.enqueue_packet_wait(QueueElement::Flush);
    }

    /// Attaches a component inside the worker critical section, totally
    /// ordered with entry processing.
    pub fn attach_component(&self, component: Component) {
        self.attachments.lock().unwrap().attach(component);
    }

    /// Drains the channel while suppressing stack-trace resolution. Used at
    /// process shutdown, when the symbolizer can no longer be called safely.
    pub fn flush_entry_point_exit(&self) {
        self.enqueue_packet_wait(QueueElement::FlushEntryPointExit);
    }

    fn enqueue_packet_wait(&self, make: impl FnOnce(ControlPacket) -> QueueElement) {
        let (packet, wait) = ControlPacket::new();
        if self.queue.send(make(packet)).is_err() {
            return;
        }
        let _ = wait.recv();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // async kill: entries enqueued after this point are lost
        let (packet, _wait) = ControlPacket::new();
        if self.queue.send(QueueElement::Kill(packet)).is_err() {
            panic_log("failed to enqueue kill packet while dropping logging channel");
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(receiver: Receiver<QueueElement>, attachments: Arc<Mutex<Attachments>>) {
    let mut exiting = false;
    while !exiting {
        let Ok(element) = receiver.recv() else {
            break;
        };
        let mut attachments = match attachments.lock() {
            Ok(guard) => guard,
            Err(_) => {
                panic_log("poisoned attachment lock in logging channel worker");
                break;
            }
        };
        match element {
            QueueElement::Entry(entry) => attachments.process(entry),
            QueueElement::Flush(packet) => {
                attachments.flush_drivers();
                packet.release();
            }
            QueueElement::Kill(packet) => {
                exiting = true;
                packet.release();
            }
            QueueElement::FlushEntryPointExit(packet) => {
                attachments.resolving_traces = false;
                attachments.flush_drivers();
                packet.release();
            }
        }
    }
}
