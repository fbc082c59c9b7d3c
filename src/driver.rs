//! Event loop driver
//!
//! Owns the PipeWire main loop. Every event the server produces arrives
//! through one channel attached to the loop and is handed to the session in
//! arrival order. The loop runs until a handler asks it to stop; that
//! request's status becomes the process exit code.

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;

use anyhow::{Context as _, Result};
use log::debug;
use pipewire as pw;

use crate::audio::{Display, DisplayMode, Flow};
use crate::server::pipewire_server::PipeWireServer;
use crate::server::Event;
use crate::session::Session;

/// Run a monitoring session until it stops, returning the exit status
pub fn run(mode: DisplayMode, device: &str) -> Result<i32> {
    pw::init();

    let mainloop =
        pw::main_loop::MainLoopRc::new(None).context("Failed to create PipeWire main loop")?;

    let (sender, receiver) = pw::channel::channel::<Event>();

    let server =
        PipeWireServer::connect(&mainloop, sender).context("Failed to connect to PipeWire")?;

    let session = Rc::new(RefCell::new(Session::new(
        server,
        device,
        Display::new(mode, io::stdout()),
    )));

    // Set by the first Quit; later events are dropped
    let status: Rc<Cell<Option<i32>>> = Rc::new(Cell::new(None));

    let receiver = {
        let session = Rc::clone(&session);
        let status = Rc::clone(&status);
        let mainloop_weak = mainloop.downgrade();
        receiver.attach(mainloop.loop_(), move |event| {
            if status.get().is_some() {
                return;
            }
            if let Flow::Quit(code) = session.borrow_mut().handle(event) {
                debug!("Stopping main loop with status {}", code);
                status.set(Some(code));
                if let Some(mainloop) = mainloop_weak.upgrade() {
                    mainloop.quit();
                }
            }
        })
    };

    mainloop.run();

    // Teardown order: the session (stream, then connection, then device
    // strings) goes before the loop it was attached to.
    drop(receiver);
    {
        let session = session.borrow();
        debug!(
            "Main loop exited, last device: {} ({})",
            session.device_description(),
            session.device_name()
        );
    }
    drop(session);
    drop(mainloop);

    Ok(status.get().unwrap_or(0))
}
