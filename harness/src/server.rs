//! # Summary
//!
//! Process-level wrapper for a spawned `chatroom-server`/`chatroom-client`
//! child, used to implement `CRASHSERVER`/`RESTARTSERVER`. Kept close to
//! the teacher's own `Server` wrapper: own the `Child`, kill it on drop.

pub struct Process(std::process::Child);

impl Process {
    pub fn spawn(
        binary: &std::path::Path,
        id: usize,
        ports: &std::path::Path,
        servers: usize,
        clients: usize,
        verbose: u8,
    ) -> Self {
        let id = id.to_string();
        let servers = servers.to_string();
        let clients = clients.to_string();
        let mut command = std::process::Command::new(binary);

        if verbose > 0 {
            let verbosity = "-".to_string() + &"v".repeat(verbose as usize);
            command.arg(&verbosity);
        }

        command
            .args(["-i", &id])
            .args(["-f"])
            .arg(ports)
            .args(["-s", &servers])
            .args(["-c", &clients])
            .spawn()
            .map(Process)
            .expect("[INTERNAL ERROR]: could not spawn process")
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.0.kill().ok();
    }
}
