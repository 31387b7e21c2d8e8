//! Deferred callbacks scheduled by timers and the simulated filesystem.
//!
//! Nothing here runs during `execute()`. The host pumps the queue with
//! [`run_due`] after the transcript has been returned; callback output goes
//! to the transcript of the call that scheduled it and is handed back to the
//! host separately.

use std::{
    cell::RefCell,
    collections::HashSet,
    rc::Rc,
    time::{Duration, Instant},
};

use mlua::{Function, MultiValue, Value};

use crate::{error::describe_lua_error, transcript::Transcript};

pub type TaskId = u32;

struct Task {
    id: TaskId,
    due: Instant,
    every: Option<Duration>,
    callback: Function,
    args: Vec<Value>,
    transcript: Rc<RefCell<Transcript>>,
}

#[derive(Default)]
pub struct TaskQueue {
    next_id: TaskId,
    tasks: Vec<Task>,
    running: HashSet<TaskId>,
    cancelled: HashSet<TaskId>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(
        &mut self,
        delay: Duration,
        every: Option<Duration>,
        callback: Function,
        args: Vec<Value>,
        transcript: Rc<RefCell<Transcript>>,
    ) -> TaskId {
        self.next_id += 1;
        let id = self.next_id;
        tracing::trace!(id, ?delay, periodic = every.is_some(), "scheduled deferred task");
        self.tasks.push(Task { id, due: Instant::now() + delay, every, callback, args, transcript });
        id
    }

    /// Cancels a pending or currently running task. Unknown ids are ignored.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        if self.tasks.len() != before {
            return true;
        }
        if self.running.contains(&id) {
            self.cancelled.insert(id);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.iter().map(|t| t.due).min()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    fn take_due(&mut self, now: Instant) -> Vec<Task> {
        let (mut due, pending): (Vec<Task>, Vec<Task>) =
            std::mem::take(&mut self.tasks).into_iter().partition(|t| t.due <= now);
        self.tasks = pending;
        due.sort_by_key(|t| (t.due, t.id));
        self.running.extend(due.iter().map(|t| t.id));
        due
    }

    fn finish(&mut self, mut task: Task) {
        self.running.remove(&task.id);
        if self.cancelled.remove(&task.id) {
            return;
        }
        if let Some(every) = task.every {
            task.due += every.max(Duration::from_millis(1));
            self.tasks.push(task);
        }
    }
}

/// Fires every task whose deadline is at or before `now`, once each.
///
/// Returns the output those callbacks produced. A failing callback is
/// recorded as a runtime error; it does not stop the others.
pub fn run_due(queue: &Rc<RefCell<TaskQueue>>, now: Instant) -> Transcript {
    let due = queue.borrow_mut().take_due(now);
    let mut produced = Transcript::new();

    for task in due {
        tracing::trace!(id = task.id, "running deferred task");
        let mark = task.transcript.borrow().len();
        let args: MultiValue = task.args.iter().cloned().collect();
        if let Err(e) = task.callback.call::<()>(args) {
            tracing::warn!(id = task.id, error = %e, "deferred task failed");
            task.transcript.borrow_mut().push_error(format!("Runtime error: {}", describe_lua_error(&e)));
        }
        produced.extend(task.transcript.borrow().since(mark));
        queue.borrow_mut().finish(task);
    }

    produced
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;

    fn recorder(lua: &Lua, out: Rc<RefCell<Transcript>>) -> mlua::Result<Function> {
        lua.create_function(move |_, msg: String| {
            out.borrow_mut().push_text(msg);
            Ok(())
        })
    }

    #[test]
    fn tasks_wait_for_their_deadline() -> mlua::Result<()> {
        let lua = Lua::new();
        let transcript = Rc::new(RefCell::new(Transcript::new()));
        let queue = Rc::new(RefCell::new(TaskQueue::new()));
        let cb = recorder(&lua, transcript.clone())?;
        queue.borrow_mut().schedule(
            Duration::from_secs(60),
            None,
            cb,
            vec![Value::String(lua.create_string("late")?)],
            transcript.clone(),
        );

        assert!(run_due(&queue, Instant::now()).is_empty());
        let out = run_due(&queue, Instant::now() + Duration::from_secs(61));
        assert_eq!(out.to_plain(), "late\n");
        assert!(queue.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn interval_rearms_until_cancelled() -> mlua::Result<()> {
        let lua = Lua::new();
        let transcript = Rc::new(RefCell::new(Transcript::new()));
        let queue = Rc::new(RefCell::new(TaskQueue::new()));
        let cb = recorder(&lua, transcript.clone())?;
        let id = queue.borrow_mut().schedule(
            Duration::from_millis(10),
            Some(Duration::from_millis(10)),
            cb,
            vec![Value::String(lua.create_string("tick")?)],
            transcript.clone(),
        );

        let far = Instant::now() + Duration::from_secs(5);
        assert_eq!(run_due(&queue, far).len(), 1);
        assert_eq!(run_due(&queue, far).len(), 1);
        assert!(queue.borrow_mut().cancel(id));
        assert!(run_due(&queue, far).is_empty());
        assert_eq!(transcript.borrow().len(), 2);
        Ok(())
    }

    #[test]
    fn failing_callback_is_reported() -> mlua::Result<()> {
        let lua = Lua::new();
        let transcript = Rc::new(RefCell::new(Transcript::new()));
        let queue = Rc::new(RefCell::new(TaskQueue::new()));
        let cb: Function = lua.load("return function() local x = nil; return x.y end").eval()?;
        queue.borrow_mut().schedule(Duration::ZERO, None, cb, Vec::new(), transcript.clone());
        let out = run_due(&queue, Instant::now() + Duration::from_millis(1));
        assert_eq!(out.error_count(), 1);
        assert_eq!(transcript.borrow().error_count(), 1);
        Ok(())
    }
}
