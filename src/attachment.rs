//! The entry attachment gate.
//!
//! An entry is attached along two independent dimensions: membership in a controller (current
//! entry or back stack) and visibility in the UI. It is torn down when it leaves the last one,
//! in whichever order that happens.

/// Attachment state of an entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    #[default]
    Detached,
    ControllerOnly,
    UiOnly,
    Both,
}

/// One of the four attach/detach events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachEvent {
    AttachController,
    DetachController,
    AttachUi,
    DetachUi,
}

/// What a transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub next: Attachment,
    /// The event changed nothing (attaching twice to the UI, detaching something detached).
    pub unchanged: bool,
    /// The entry must be torn down: it was attached and now is not.
    pub teardown: bool,
}

impl Attachment {
    pub fn from_flags(controller: bool, ui: bool) -> Attachment {
        match (controller, ui) {
            (false, false) => Attachment::Detached,
            (true, false) => Attachment::ControllerOnly,
            (false, true) => Attachment::UiOnly,
            (true, true) => Attachment::Both,
        }
    }

    pub fn is_attached_to_controller(self) -> bool {
        matches!(self, Attachment::ControllerOnly | Attachment::Both)
    }

    pub fn is_attached_to_ui(self) -> bool {
        matches!(self, Attachment::UiOnly | Attachment::Both)
    }

    /// Applies an event.
    ///
    /// Attaching to a controller when already attached is not handled here; callers check
    /// [`Attachment::is_attached_to_controller`] first and fail.
    pub fn apply(self, event: AttachEvent) -> Step {
        let mut controller = self.is_attached_to_controller();
        let mut ui = self.is_attached_to_ui();
        match event {
            AttachEvent::AttachController => controller = true,
            AttachEvent::DetachController => controller = false,
            AttachEvent::AttachUi => ui = true,
            AttachEvent::DetachUi => ui = false,
        }
        let next = Attachment::from_flags(controller, ui);
        Step {
            next,
            unchanged: next == self,
            teardown: self != Attachment::Detached && next == Attachment::Detached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn event() -> impl Strategy<Value = AttachEvent> {
        prop_oneof![
            Just(AttachEvent::AttachController),
            Just(AttachEvent::DetachController),
            Just(AttachEvent::AttachUi),
            Just(AttachEvent::DetachUi),
        ]
    }

    #[test]
    fn teardown_after_second_detach_in_either_order() {
        let both = Attachment::Detached
            .apply(AttachEvent::AttachUi)
            .next
            .apply(AttachEvent::AttachController)
            .next;
        assert_eq!(both, Attachment::Both);

        let ui_first = both.apply(AttachEvent::DetachUi);
        assert!(!ui_first.teardown, "still on the stack");
        let then_controller = ui_first.next.apply(AttachEvent::DetachController);
        assert!(then_controller.teardown);

        let controller_first = both.apply(AttachEvent::DetachController);
        assert!(!controller_first.teardown, "still on screen");
        assert!(controller_first.next.apply(AttachEvent::DetachUi).teardown);
    }

    #[test]
    fn detaching_a_detached_entry_is_not_a_teardown() {
        let step = Attachment::Detached.apply(AttachEvent::DetachUi);
        assert!(step.unchanged);
        assert!(!step.teardown);
    }

    proptest! {
        #[test]
        fn teardowns_match_a_two_flag_model(events in prop::collection::vec(event(), 0..40)) {
            let mut state = Attachment::Detached;
            let (mut on_stack, mut on_screen) = (false, false);
            let (mut teardowns, mut cycles) = (0, 0);
            for event in events {
                let was_attached = on_stack || on_screen;
                match event {
                    AttachEvent::AttachController => on_stack = true,
                    AttachEvent::DetachController => on_stack = false,
                    AttachEvent::AttachUi => on_screen = true,
                    AttachEvent::DetachUi => on_screen = false,
                }
                if was_attached && !on_stack && !on_screen {
                    cycles += 1;
                }

                let step = state.apply(event);
                if step.teardown {
                    teardowns += 1;
                }
                prop_assert_eq!(step.next.is_attached_to_controller(), on_stack);
                prop_assert_eq!(step.next.is_attached_to_ui(), on_screen);
                state = step.next;
            }
            prop_assert_eq!(teardowns, cycles, "one teardown per attach cycle");
        }
    }
}
