//! Messages carried by envelopes
//!
//! A message is a type tag, an optional owned body, an auxiliary integer
//! and two optional plain-function callbacks. The body is opaque to the
//! scheduler; it is handed to the destination handler, or to the flush
//! callback when the message is discarded undelivered.

use core::any::Any;
use core::fmt;

use crate::error::{HandlerError, HandlerResult};

/// Owned message payload
pub type Body = Box<dyn Any + Send>;

/// Processing callback some destinations invoke instead of their own logic
pub type MessageCallback = fn(&mut Message) -> HandlerResult;

/// Disposal callback run exactly once when a message is discarded undelivered
pub type FlushCallback = fn(&mut Message);

/// A unit of work posted to a destination
pub struct Message {
    /// Message type tag, meaning is defined by the destination
    pub msg_type: u16,
    /// Owned payload
    pub body: Option<Body>,
    /// Auxiliary integer payload
    pub body_val: u32,
    /// Optional processing callback
    pub callback: Option<MessageCallback>,
    /// Optional disposal callback
    pub flush_callback: Option<FlushCallback>,
}

impl Message {
    pub const fn new(msg_type: u16) -> Self {
        Message {
            msg_type,
            body: None,
            body_val: 0,
            callback: None,
            flush_callback: None,
        }
    }

    pub fn with_body<T: Any + Send>(mut self, body: T) -> Self {
        self.body = Some(Box::new(body));
        self
    }

    pub fn with_boxed_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_body_val(mut self, val: u32) -> Self {
        self.body_val = val;
        self
    }

    pub fn with_callback(mut self, cb: MessageCallback) -> Self {
        self.callback = Some(cb);
        self
    }

    pub fn with_flush_callback(mut self, cb: FlushCallback) -> Self {
        self.flush_callback = Some(cb);
        self
    }

    /// Borrow the body as `T`
    pub fn body_ref<T: Any>(&self) -> Option<&T> {
        self.body.as_ref().and_then(|b| b.downcast_ref::<T>())
    }

    pub fn body_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.body.as_mut().and_then(|b| b.downcast_mut::<T>())
    }

    /// Take the body if it is a `T`; a body of another type is left in place
    pub fn take_body<T: Any>(&mut self) -> Option<Box<T>> {
        let body = self.body.take()?;
        match body.downcast::<T>() {
            Ok(b) => Some(b),
            Err(b) => {
                self.body = Some(b);
                None
            }
        }
    }

    #[inline]
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Run the processing callback
    pub fn invoke_callback(&mut self) -> HandlerResult {
        match self.callback {
            Some(cb) => cb(self),
            None => Err(HandlerError::MissingCallback),
        }
    }

    /// Dispose of an undelivered message
    ///
    /// Runs the flush callback if present, otherwise drops the body.
    /// The flush callback is consumed, so a second call only drops whatever
    /// body the callback left behind. Returns whether the callback ran.
    pub fn flush(&mut self) -> bool {
        let ran = match self.flush_callback.take() {
            Some(cb) => {
                cb(self);
                true
            }
            None => false,
        };
        self.body = None;
        ran
    }

    /// Address of the processing callback, for diagnostics
    pub fn callback_addr(&self) -> Option<usize> {
        self.callback.map(|cb| cb as usize)
    }
}

impl Default for Message {
    fn default() -> Self {
        Message::new(0)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("msg_type", &format!("{:#06x}", self.msg_type))
            .field("body", &self.body.as_ref().map(|_| "<opaque>"))
            .field("body_val", &self.body_val)
            .field("callback", &self.callback_addr().map(|a| format!("{:#x}", a)))
            .field("flush_callback", &self.flush_callback.is_some())
            .finish()
    }
}
