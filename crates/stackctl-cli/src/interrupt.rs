use stackctl_core::health::Interrupt;

/// 128 + SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

/// Listen for Ctrl-C on a dedicated thread and flip the returned flag.
///
/// The first Ctrl-C only sets the flag so the current step can finish and no
/// further step starts. A second one exits immediately with status 130.
/// Only installed for commands that block in the health gate; everything else
/// keeps the default SIGINT behaviour.
pub fn install() -> Interrupt {
    let interrupt = Interrupt::new();
    let flag = interrupt.clone();
    let spawned = std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::warn!(error = %e, "interrupt listener unavailable");
                    return;
                }
            };
            rt.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                tracing::warn!("interrupted; stopping after the current step (Ctrl-C again to abort)");
                flag.trigger();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(EXIT_INTERRUPTED);
                }
            });
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to spawn interrupt listener");
    }
    interrupt
}
