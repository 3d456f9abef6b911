//! Change and transition records

/// The before/after pair of one accepted emission
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Change<S> {
    previous: S,
    next: S,
}

impl<S> Change<S> {
    pub fn new(previous: S, next: S) -> Self {
        Self { previous, next }
    }

    pub fn previous(&self) -> &S {
        &self.previous
    }

    pub fn next(&self) -> &S {
        &self.next
    }

    pub fn into_parts(self) -> (S, S) {
        (self.previous, self.next)
    }
}

/// Net effect of one handled event: the state before the handler ran, the
/// event, and the state after it returned
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Transition<S, E> {
    previous: S,
    event: E,
    next: S,
}

impl<S, E> Transition<S, E> {
    pub fn new(previous: S, event: E, next: S) -> Self {
        Self {
            previous,
            event,
            next,
        }
    }

    pub fn previous(&self) -> &S {
        &self.previous
    }

    pub fn event(&self) -> &E {
        &self.event
    }

    pub fn next(&self) -> &S {
        &self.next
    }

    pub fn into_parts(self) -> (S, E, S) {
        (self.previous, self.event, self.next)
    }
}
