// single-flight task queue.
//
// both the read and the write pipeline funnel their channel operations through a queue of
// tasks which is drained by at most one thread at a time:
//
//   accept (any thread)                    run (whichever thread holds the running flag)
//   ------------------                     ----------------------------------------------
//   push task                              loop:
//   CAS running false -> true ---------->    pop and process tasks until empty or halted
//     won: submit run to executor            if halted, finish (close the channel) once
//     lost: the holder will see the task     release running flag
//                                            re-check for work, CAS running false -> true
//                                              won: go around again
//                                              lost / no work: return
//
// the re-check after releasing is what prevents lost wakeups: an accept which lost its CAS
// before the release pushed its task before that CAS, so the re-check sees it.
//
// "halted" is the owner's terminal state (subscriber done, result resolved). once halted, the
// queue stops processing tasks and runs the owner's finish hook exactly once, on the thread
// holding the running flag, so the channel is never touched by anyone but the current runner.

use crate::{
    error::{panic_message, Error},
    executor::IoExecutor,
};
use crossbeam_queue::SegQueue;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{
            AtomicBool,
            Ordering::SeqCst,
        },
        Arc,
    },
};


// queue of pending tasks plus the flags of the single-flight protocol.
pub(crate) struct TaskQueue<T> {
    tasks: SegQueue<T>,
    // true while some thread owns the right to drain.
    running: AtomicBool,
    // true once the owner's finish hook has run.
    finished: AtomicBool,
}

impl<T> TaskQueue<T> {
    pub(crate) fn new() -> Self {
        TaskQueue {
            tasks: SegQueue::new(),
            running: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    // enqueue a task without scheduling a drain.
    pub(crate) fn push(&self, task: T) {
        self.tasks.push(task);
    }

    // drop all pending tasks.
    pub(crate) fn clear(&self) {
        while self.tasks.pop().is_some() {}
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(SeqCst)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(SeqCst)
    }

    // try to become the runner.
    fn acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_ok()
    }

    fn release(&self) {
        let was = self.running.swap(false, SeqCst);
        debug_assert!(was, "running flag released by non-runner");
    }
}

// owner of a task queue and the channel its tasks operate on.
pub(crate) trait Drain: Send + Sync + Sized + 'static {
    type Task: Send;

    fn queue(&self) -> &TaskQueue<Self::Task>;

    fn executor(&self) -> &IoExecutor;

    // whether the owner reached its terminal state.
    fn halted(&self) -> bool;

    // execute one task. only called by the runner, only while not halted.
    fn process(&self, task: Self::Task);

    // reach the terminal state with an error: a task panicked, or the drain could not be
    // scheduled. must make `halted` return true.
    fn fail(&self, error: Error);

    // release the channel. called exactly once, by the runner, after halting.
    fn finish(&self);
}

// make sure a runner will see the queue's current contents and halted state, submitting a
// drain to the executor if nobody is running.
pub(crate) fn schedule<D: Drain>(drain: &Arc<D>) {
    if !drain.queue().acquire() {
        return;
    }
    let runner = Arc::clone(drain);
    trace!("submitting drain loop");
    if let Err(e) = drain.executor().submit(move || run(&*runner)) {
        // we hold the running flag, so we may finish inline.
        drain.fail(e);
        run(&**drain);
    }
}

// the drain loop. must only be entered by the thread that acquired the running flag.
pub(crate) fn run<D: Drain>(drain: &D) {
    let queue = drain.queue();
    loop {
        while !drain.halted() {
            let Some(task) = queue.tasks.pop() else { break };
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| drain.process(task))) {
                drain.fail(Error::Panicked(panic_message(&*payload)));
            }
        }
        if drain.halted() && !queue.finished.swap(true, SeqCst) {
            queue.clear();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| drain.finish())) {
                error!(panic = %panic_message(&*payload), "channel finish panicked");
            }
            trace!("drain loop finished channel");
        }
        queue.release();

        let more = if drain.halted() {
            !queue.is_finished()
        } else {
            !queue.is_empty()
        };
        if !more || !queue.acquire() {
            return;
        }
        trace!("drain loop re-armed");
    }
}
