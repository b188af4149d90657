//! Try-frame records for structured exception handling.

/// The phase a try region is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionHandlingState {
    /// The try block is running.
    Try,
    /// The catch block is running.
    Catch,
    /// The finally block is running.
    Finally,
}

/// One record in a frame's try stack, tracking an active
/// TRY/CATCH/FINALLY region.
///
/// At least one of `catch_pointer` and `finally_pointer` is present; TRY
/// rejects a region declaring neither. `end_pointer` is recorded by ENDTRY
/// before it diverts into the finally block, so ENDFINALLY knows where to
/// resume.
#[derive(Debug, Clone)]
pub struct ExceptionHandlingContext {
    catch_pointer: Option<usize>,
    finally_pointer: Option<usize>,
    end_pointer: Option<usize>,
    state: ExceptionHandlingState,
}

impl ExceptionHandlingContext {
    /// Creates a try frame with the given absolute handler positions.
    pub fn new(catch_pointer: Option<usize>, finally_pointer: Option<usize>) -> Self {
        debug_assert!(catch_pointer.is_some() || finally_pointer.is_some());
        Self {
            catch_pointer,
            finally_pointer,
            end_pointer: None,
            state: ExceptionHandlingState::Try,
        }
    }

    /// The absolute position of the catch block, if declared.
    pub fn catch_pointer(&self) -> Option<usize> {
        self.catch_pointer
    }

    /// The absolute position of the finally block, if declared.
    pub fn finally_pointer(&self) -> Option<usize> {
        self.finally_pointer
    }

    /// The position execution resumes at after the finally block.
    pub fn end_pointer(&self) -> Option<usize> {
        self.end_pointer
    }

    /// Records where ENDFINALLY should resume.
    pub fn set_end_pointer(&mut self, end_pointer: usize) {
        self.end_pointer = Some(end_pointer);
    }

    /// Returns `true` when the region declares a catch block.
    pub fn has_catch(&self) -> bool {
        self.catch_pointer.is_some()
    }

    /// Returns `true` when the region declares a finally block.
    pub fn has_finally(&self) -> bool {
        self.finally_pointer.is_some()
    }

    /// The current phase of the region.
    pub fn state(&self) -> ExceptionHandlingState {
        self.state
    }

    /// Advances the region to a new phase.
    pub fn set_state(&mut self, state: ExceptionHandlingState) {
        self.state = state;
    }
}
