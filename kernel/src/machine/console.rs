//! Raw console device
//!
//! An asynchronous character device over a byte source and a byte sink.
//! Input is polled on a simulated-time interval; each output byte completes
//! after a device delay. Both completions are delivered as interrupt
//! callbacks — the synchronized console layers blocking semantics on top.

use std::io::{Read, Write};
use std::sync::Arc;

use core::sync::atomic::{AtomicBool, Ordering};

use log::trace;
use spin::Mutex;

use crate::bootstrap::Kernel;

/// Device delay, in simulated ticks, for one character in either direction.
pub const CONSOLE_TIME: u64 = 100;

type Callback = Box<dyn Fn(&Kernel) + Send + Sync>;

pub struct Console {
    source: Mutex<Box<dyn Read + Send>>,
    sink: Mutex<Box<dyn Write + Send>>,
    /// Character received but not yet fetched.
    incoming: Mutex<Option<u8>>,
    /// Character handed to the device but not yet transmitted.
    outgoing: Mutex<Option<u8>>,
    eof: AtomicBool,
    read_avail: Callback,
    write_done: Callback,
}

impl Console {
    pub fn new(
        source: Box<dyn Read + Send>,
        sink: Box<dyn Write + Send>,
        read_avail: Callback,
        write_done: Callback,
    ) -> Arc<Self> {
        Arc::new(Self {
            source: Mutex::new(source),
            sink: Mutex::new(sink),
            incoming: Mutex::new(None),
            outgoing: Mutex::new(None),
            eof: AtomicBool::new(false),
            read_avail,
            write_done,
        })
    }

    /// Begin polling for input. Called once when the kernel starts running.
    pub fn start(self: &Arc<Self>, kernel: &Kernel) {
        self.schedule_poll(kernel);
    }

    fn schedule_poll(self: &Arc<Self>, kernel: &Kernel) {
        let device = Arc::clone(self);
        kernel
            .interrupt
            .schedule(CONSOLE_TIME, Box::new(move |k| device.check_char_avail(k)));
    }

    /// Poll interrupt handler: pick up the next input byte if the previous
    /// one has been consumed. The poll chain stops at end of input, with one
    /// final wakeup so a blocked reader can observe EOF.
    fn check_char_avail(self: &Arc<Self>, kernel: &Kernel) {
        if kernel.interrupt.is_halted() || self.eof.load(Ordering::Relaxed) {
            return;
        }

        let fetched = {
            let mut incoming = self.incoming.lock();
            if incoming.is_some() {
                None
            } else {
                let mut byte = [0u8; 1];
                let n = self.source.lock().read(&mut byte).unwrap_or(0);
                if n == 0 {
                    self.eof.store(true, Ordering::Relaxed);
                    Some(None)
                } else {
                    *incoming = Some(byte[0]);
                    Some(Some(byte[0]))
                }
            }
        };

        match fetched {
            Some(None) => {
                trace!("console input exhausted");
                (self.read_avail)(kernel);
            }
            Some(Some(_)) => {
                (self.read_avail)(kernel);
                self.schedule_poll(kernel);
            }
            None => self.schedule_poll(kernel),
        }
    }

    /// Fetch the pending input character, if any.
    pub fn get_char(&self) -> Option<u8> {
        self.incoming.lock().take()
    }

    /// True once the source is exhausted and every byte has been fetched.
    pub fn at_eof(&self) -> bool {
        self.eof.load(Ordering::Relaxed) && self.incoming.lock().is_none()
    }

    /// Hand one character to the device. The device must be idle; the
    /// write-done interrupt fires after `CONSOLE_TIME` ticks.
    pub fn put_char(self: &Arc<Self>, kernel: &Kernel, ch: u8) {
        {
            let mut outgoing = self.outgoing.lock();
            assert!(outgoing.is_none(), "console device started while busy");
            *outgoing = Some(ch);
        }
        let device = Arc::clone(self);
        kernel
            .interrupt
            .schedule(CONSOLE_TIME, Box::new(move |k| device.write_complete(k)));
    }

    fn write_complete(self: &Arc<Self>, kernel: &Kernel) {
        if let Some(ch) = self.outgoing.lock().take() {
            let mut sink = self.sink.lock();
            let _ = sink.write_all(&[ch]);
            let _ = sink.flush();
        }
        (self.write_done)(kernel);
    }
}

/// In-memory console sink whose contents outlive the run; used by tests and
/// by callers that want to inspect simulated console output.
#[derive(Clone, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `Write` handle feeding this capture buffer.
    pub fn sink(&self) -> Box<dyn Write + Send> {
        Box::new(CaptureSink(Arc::clone(&self.buffer)))
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

struct CaptureSink(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
