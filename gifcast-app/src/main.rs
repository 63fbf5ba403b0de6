//! The gifcast demonstrator: one process running both the paced frame
//! server and the viewing client on a single-threaded cooperative
//! executor.
//!
//! `main` resolves the endpoints, starts the server's acceptors,
//! creates the window and spawns the long-lived tasks (signal watcher,
//! GUI event watcher, video client), all bound to one stop source.
//! Any of them may flip the stop; everything then unwinds
//! cooperatively.

use std::cell::RefCell;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use tokio::task::LocalSet;
use tokio::time;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gifcast_core::{client, net, server, stop, Stop, SERVER_PORT};
use gifcast_gui::FancyWindow;

/// Time budget for resolving the server name.
const RESOLVE_BUDGET: Duration = Duration::from_secs(1);

/// How often the GUI event queue is drained.
const GUI_POLL_INTERVAL: Duration = Duration::from_millis(50);

const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;

// Exit codes shared with the scripts driving the demonstrator.
const NO_MEDIA_DIRECTORY: i32 = -2;
const NO_ENDPOINTS: i32 = -3;
const NO_ACCEPTOR: i32 = -4;

/// Streams GIF frames from a media directory to a local viewer.
#[derive(Debug, Parser)]
#[command(name = "gifcast")]
struct Options {
    /// media directory
    #[arg(short, long, default_value = "media")]
    media: String,

    /// server name or ip
    #[arg(short, long, default_value = "")]
    server: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // help and usage errors both leave with a non-success code
    let options = match Options::try_parse() {
        Ok(options) => options,
        Err(error) => {
            let _ = error.print();
            process::exit(-1);
        }
    };
    if options.media.is_empty() {
        process::exit(NO_MEDIA_DIRECTORY);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "could not build the runtime");
            process::exit(1);
        }
    };

    let local = LocalSet::new();
    let code = runtime.block_on(local.run_until(run(options)));
    process::exit(code);
}

async fn run(options: Options) -> i32 {
    let endpoints = net::resolve(&options.server, SERVER_PORT, RESOLVE_BUDGET).await;
    if endpoints.is_empty() {
        error!(server = %options.server, "no endpoints resolved");
        return NO_ENDPOINTS;
    }

    let stop = Stop::new();
    let media = PathBuf::from(options.media);
    if let Err(error) = server::serve(&endpoints, &media, &stop).await {
        error!(%error, "could not start serving");
        return NO_ACCEPTOR;
    }

    let window = match FancyWindow::new(WINDOW_WIDTH, WINDOW_HEIGHT) {
        Ok(window) => Rc::new(RefCell::new(window)),
        Err(error) => {
            error!(%error, "could not create the window");
            return 1;
        }
    };

    let signals = stop::spawn(&stop, stop_on_signal(stop.clone()));
    let gui = stop::spawn(&stop, handle_gui_events(Rc::clone(&window), stop.clone()));
    let videos = stop::spawn(&stop, client::show_videos(endpoints, window, stop.clone()));

    // the client flips the stop on exit, which unwinds everything else
    let _ = videos.await;
    let _ = gui.await;
    let _ = signals.await;
    0
}

/// Flip the global stop when the user interrupts or terminates the
/// process.
#[cfg(unix)]
async fn stop_on_signal(stop: Stop) {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut interrupt), Ok(mut terminate)) =
        (signal(SignalKind::interrupt()), signal(SignalKind::terminate()))
    else {
        return;
    };
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    info!("stop requested by signal");
    stop.request();
}

#[cfg(not(unix))]
async fn stop_on_signal(stop: Stop) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("stop requested by signal");
        stop.request();
    }
}

/// Poll the window's event queue; a quit event flips the global stop.
async fn handle_gui_events(window: Rc<RefCell<FancyWindow>>, stop: Stop) {
    while !stop.is_requested() {
        if window.borrow_mut().is_alive() {
            time::sleep(GUI_POLL_INTERVAL).await;
        } else {
            info!("window closed");
            stop.request();
        }
    }
}
