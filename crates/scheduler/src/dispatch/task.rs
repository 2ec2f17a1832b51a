use std::cell::RefCell;
use std::rc::Rc;

use cadence_core::UpdatePhase;

use crate::error::Result;

/// An updatable unit advanced by the [`TaskDispatcher`](super::TaskDispatcher).
///
/// Only [`update`](Task::update) is required. Tasks receive the primary
/// update phase unless they opt in to more phases through
/// [`supports`](Task::supports).
pub trait Task {
    /// Name used in logs and notifications.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Inactive tasks stay registered but are skipped.
    fn is_active(&self) -> bool {
        true
    }

    fn supports(&self, phase: UpdatePhase) -> bool {
        phase == UpdatePhase::Update
    }

    fn update(&mut self, phase: UpdatePhase) -> Result<()>;
}

/// Shared task reference. Identity is the allocation, not the value.
pub type TaskRef = Rc<RefCell<dyn Task>>;

pub(crate) fn task_key(task: &TaskRef) -> usize {
    Rc::as_ptr(task) as *const () as usize
}
