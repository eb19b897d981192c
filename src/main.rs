use std::{
    env::args,
    fs::OpenOptions,
    io::Write,
    sync::{Arc, mpsc},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Context;
use env_logger::{Builder, Target};
use log::{error, info, warn};
use mio::{Events, Poll};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use swatch_display::{DisplayState, PaletteManager};
use swatch_shared::{
    DisplayMessage, GlobalArgs, MESSAGE_CHANNEL_TOKEN, MainMessage, MessageSender,
    message_loop_with_channel,
};

/// How long the display thread gets to disconnect its clients after a shutdown was requested
const FORCE_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(1000);

fn main() -> anyhow::Result<()> {
    let Some(global_args) = GlobalArgs::parse(args()) else {
        return Ok(());
    };

    init_logger(global_args.log_file.as_deref())?;

    run_app(Arc::new(global_args)).inspect_err(|err| error!("An error occurred: {err:#}"))
}

fn init_logger(log_file: Option<&str>) -> anyhow::Result<()> {
    let mut builder = Builder::from_default_env();
    if let Some(log_file) = log_file {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("Failed to open log file")?;
        builder.target(Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(Target::Stderr);
    }
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{:<5}] {}: {}",
            record.level(),
            thread::current().name().unwrap_or("<unnamed>"),
            record.args()
        )
    });
    builder.init();

    Ok(())
}

/// Represents the data for the main thread
struct MainData {
    event_loop: Poll,
    channel: mpsc::Receiver<MainMessage>,
    to_display: MessageSender<DisplayMessage>,
    display_join_handle: JoinHandle<()>,
    force_shutdown_timeout: Duration,
    /// Set once a shutdown was requested. Reaching it ends main without waiting any longer.
    force_shutdown_at: Option<Instant>,
}

impl MainData {
    /// Runs until the display thread has finished or the force shutdown timeout is reached
    fn run(mut self) -> anyhow::Result<()> {
        let mut events = Events::with_capacity(8);
        loop {
            let timeout = self
                .force_shutdown_at
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));
            if let Err(err) = self.event_loop.poll(&mut events, timeout) {
                if err.kind() != std::io::ErrorKind::Interrupted {
                    return Err(err).context("Unable to poll main loop");
                }
            }

            for event in events.iter() {
                if event.token() != MESSAGE_CHANNEL_TOKEN {
                    continue;
                }
                while let Ok(message) = self.channel.try_recv() {
                    match message {
                        MainMessage::Shutdown => self.shutdown(),
                        MainMessage::ThreadExited => {
                            if self.display_join_handle.join().is_err() {
                                error!("Unable to join display thread");
                            }
                            return Ok(());
                        }
                    }
                }
            }

            if self
                .force_shutdown_at
                .is_some_and(|deadline| Instant::now() >= deadline)
            {
                info!("Force shutdown timeout reached. Shutting down now");
                return Ok(());
            }
        }
    }

    fn shutdown(&mut self) {
        if self.force_shutdown_at.is_some() {
            return;
        }
        info!("Shutting down");
        self.force_shutdown_at = Some(Instant::now() + self.force_shutdown_timeout);
        if let Err(err) = self.to_display.send(DisplayMessage::Shutdown) {
            // The display thread already exited and dropped its receiver
            info!("Unable to send shutdown to display: {err}");
        }
    }
}

/// Starts the display thread and the signal thread. The main thread forwards shutdown requests to
/// the display and waits for the display thread to finish.
fn run_app(args: Arc<GlobalArgs>) -> anyhow::Result<()> {
    let (main_loop, main_channel, to_main) = message_loop_with_channel::<MainMessage>()
        .context("Unable to create main loop")?;
    let (display_loop, display_channel, to_display) =
        message_loop_with_channel::<DisplayMessage>().context("Unable to create event loop")?;

    spawn_signal_thread(to_main.clone()).context("Unable to install signal handlers")?;

    let display_join_handle = run_thread(String::from("display"), to_main, move || {
        let mut display = DisplayState::new(display_loop, display_channel, args);
        log_palette_events(display.palette_manager_mut());
        display.run()
    })
    .context("Unable to run display thread")?;

    MainData {
        event_loop: main_loop,
        channel: main_channel,
        to_display,
        display_join_handle,
        force_shutdown_timeout: FORCE_SHUTDOWN_TIMEOUT,
        force_shutdown_at: None,
    }
    .run()
}

/// Logs the lifecycle of every palette. The decoration drawing side hooks in the same way.
fn log_palette_events(palette_manager: &mut PaletteManager) {
    palette_manager.on_palette_created(|palette| {
        info!("{} created for {:?}", palette.key(), palette.surface());
        palette.on_palette_changed(|key, value| info!("{key} set to {value:?}"));
    });
    palette_manager.on_palette_destroyed(|palette| {
        info!("{} destroyed", palette.key());
    });
}

/// Forwards SIGINT and SIGTERM to the main thread as shutdown requests
fn spawn_signal_thread(to_main: MessageSender<MainMessage>) -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Unable to register signals")?;
    thread::Builder::new()
        .name(String::from("signals"))
        .spawn(move || {
            for signal in signals.forever() {
                info!("Received signal {signal}");
                if to_main.send(MainMessage::Shutdown).is_err() {
                    break;
                }
            }
        })
        .context("Unable to spawn signal thread")?;

    Ok(())
}

/// Spawns a new thread and runs the given function in it, returning a handle to the newly created
/// thread. The spawned thread is wrapped in a panic handler and always tells main that it exited.
fn run_thread<F>(
    name: String,
    to_main: MessageSender<MainMessage>,
    run: F,
) -> anyhow::Result<JoinHandle<()>>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    let join_handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(run));
            match result {
                Ok(Ok(())) => {
                    info!("Thread exited normally");
                }
                Ok(Err(err)) => {
                    error!("Thread exited with an error: {err:#}");
                }
                Err(err) => {
                    if let Some(err) = err.downcast_ref::<&str>() {
                        error!("Thread panicked: {err}");
                    } else if let Some(err) = err.downcast_ref::<String>() {
                        error!("Thread panicked: {err}");
                    } else {
                        error!("Thread panicked: {:?}", err);
                    }
                }
            }
            info!("Notifying main, because thread is about to exit");

            if let Err(err) = to_main.send(MainMessage::ThreadExited) {
                warn!("Unable to notify main about thread exit: {err}");
            }
        })
        .context("Unable to spawn thread")?;

    Ok(join_handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_test_thread<F>(run: F) -> mpsc::Receiver<MainMessage>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let (_, main_channel, to_main) = message_loop_with_channel::<MainMessage>().unwrap();
        let join_handle = run_thread(String::from("test_thread"), to_main, run).unwrap();
        join_handle.join().unwrap();
        main_channel
    }

    /// Builds the main loop around a display thread running `display`
    fn main_data<F>(
        display: F,
        force_shutdown_timeout: Duration,
    ) -> (MainData, MessageSender<MainMessage>)
    where
        F: FnOnce(mpsc::Receiver<DisplayMessage>) -> anyhow::Result<()> + Send + 'static,
    {
        let (event_loop, channel, to_main) = message_loop_with_channel::<MainMessage>().unwrap();
        let (_, display_channel, to_display) =
            message_loop_with_channel::<DisplayMessage>().unwrap();
        let display_join_handle = run_thread(String::from("display"), to_main.clone(), move || {
            display(display_channel)
        })
        .unwrap();
        let data = MainData {
            event_loop,
            channel,
            to_display,
            display_join_handle,
            force_shutdown_timeout,
            force_shutdown_at: None,
        };
        (data, to_main)
    }

    #[test]
    fn run_thread_reports_exit() {
        let main_channel = run_test_thread(|| Ok(()));

        assert_eq!(main_channel.recv().unwrap(), MainMessage::ThreadExited);
        // No other messages should be received
        assert!(main_channel.try_recv().is_err());
    }

    #[test]
    fn run_thread_reports_exit_on_error() {
        let main_channel = run_test_thread(|| anyhow::bail!("display failed"));

        assert_eq!(main_channel.recv().unwrap(), MainMessage::ThreadExited);
        assert!(main_channel.try_recv().is_err());
    }

    #[test]
    fn run_thread_reports_exit_on_panic() {
        let main_channel = run_test_thread(|| panic!("display panicked"));

        assert_eq!(main_channel.recv().unwrap(), MainMessage::ThreadExited);
        assert!(main_channel.try_recv().is_err());
    }

    #[test]
    fn run_thread_keeps_the_thread_name() {
        let (to_name, names) = mpsc::channel();
        let (_, _main_channel, to_main) = message_loop_with_channel::<MainMessage>().unwrap();
        run_thread(String::from("display"), to_main, move || {
            to_name.send(thread::current().name().map(String::from))?;
            Ok(())
        })
        .unwrap()
        .join()
        .unwrap();

        assert_eq!(names.recv().unwrap().as_deref(), Some("display"));
    }

    #[test]
    fn shutdown_is_forwarded_to_the_display() {
        let (data, to_main) = main_data(
            |channel| match channel.recv()? {
                DisplayMessage::Shutdown => Ok(()),
            },
            Duration::from_secs(60),
        );

        to_main.send(MainMessage::Shutdown).unwrap();
        let started = Instant::now();
        data.run().unwrap();

        // Returned because the display exited, not because the timeout expired
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn main_exits_when_the_display_exits_on_its_own() {
        let (data, _to_main) = main_data(|_| anyhow::bail!("no socket"), Duration::from_secs(60));

        data.run().unwrap();
    }

    #[test]
    fn unresponsive_display_is_abandoned_after_timeout() {
        let (release, released) = mpsc::channel::<()>();
        let (data, to_main) = main_data(
            move |_| {
                // Ignores the shutdown request until the test is over
                let _ = released.recv();
                Ok(())
            },
            Duration::from_millis(50),
        );

        to_main.send(MainMessage::Shutdown).unwrap();
        let started = Instant::now();
        data.run().unwrap();

        assert!(started.elapsed() >= Duration::from_millis(50));
        drop(release);
    }
}
