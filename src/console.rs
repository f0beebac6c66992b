//! Admin Console
//!
//! Line-oriented admin commands. The binary feeds it lines from stdin as the
//! [`Caller::Console`]; anything embedding the server can run the same
//! commands on behalf of a named identity, which then has to pass the
//! permission checks.
//!
//! ```text
//! help                          list commands
//! status                        connections, entries, cache, capacity
//! test                          write, read back, verify and delete a probe key
//! clear                         delete every entry (console only)
//! reload                        re-read the config file
//! access grant|revoke|list [id]
//! admin add|remove|list [id]
//! ```
//!
//! Commands run synchronously and reach the grid through the executor, so
//! they must be called from a plain thread, not from inside the runtime.

use crate::commands::run_blocking;
use crate::config::Config;
use crate::permissions::AccessControl;
use crate::protocol::now_millis;
use crate::server::ServerContext;
use bytes::Bytes;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Who is running a console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// The server's own stdin
    Console,
    /// A named identity checked against the permission store
    Identity(String),
}

impl Caller {
    fn name(&self) -> &str {
        match self {
            Caller::Console => "console",
            Caller::Identity(name) => name,
        }
    }
}

const HELP: &str = "\
Commands:
  help                           Show this help
  status                         Show database status
  test                           Run a write/read/delete self test
  clear                          Delete all entries (console only)
  reload                         Reload the configuration file
  access grant|revoke|list [id]  Manage database access
  admin add|remove|list [id]     Manage admins";

const NO_PERMISSION: &str = "You don't have permission to use this command.";

pub struct Console {
    ctx: Arc<ServerContext>,
    acl: Arc<dyn AccessControl>,
    config_path: Option<PathBuf>,
}

impl Console {
    pub fn new(ctx: Arc<ServerContext>, acl: Arc<dyn AccessControl>, config_path: Option<PathBuf>) -> Self {
        Self {
            ctx,
            acl,
            config_path,
        }
    }

    /// Runs one command line and returns the reply text.
    pub fn execute(&self, caller: &Caller, line: &str) -> String {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return String::new();
        };
        let args: Vec<&str> = words.collect();

        info!(caller = caller.name(), command = command, "Console command");

        match command.to_ascii_lowercase().as_str() {
            "help" => HELP.to_string(),
            "status" => self.guarded(caller, Self::may_use, |c| c.status()),
            "test" => self.guarded(caller, Self::may_use, |c| c.self_test()),
            "clear" => self.clear(caller),
            "reload" => self.guarded(caller, Self::is_admin, |c| c.reload()),
            "access" => self.guarded(caller, Self::is_admin, |c| c.access(&args)),
            "admin" => self.guarded(caller, Self::is_admin, |c| c.admin(&args)),
            other => format!("Unknown command '{}'. Type 'help' for a list of commands.", other),
        }
    }

    /// Reads commands from stdin until it closes, printing each reply.
    pub fn run_stdin(&self) {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Console input failed");
                    break;
                }
            };
            let reply = self.execute(&Caller::Console, &line);
            if !reply.is_empty() {
                println!("{}", reply);
            }
        }
    }

    fn guarded(
        &self,
        caller: &Caller,
        allowed: fn(&Self, &Caller) -> bool,
        run: impl FnOnce(&Self) -> String,
    ) -> String {
        if !allowed(self, caller) {
            warn!(caller = caller.name(), "Console command refused");
            return NO_PERMISSION.to_string();
        }
        run(self)
    }

    fn may_use(&self, caller: &Caller) -> bool {
        match caller {
            Caller::Console => true,
            Caller::Identity(name) => self.acl.has_access(name),
        }
    }

    fn is_admin(&self, caller: &Caller) -> bool {
        match caller {
            Caller::Console => true,
            Caller::Identity(name) => self.acl.is_admin(name),
        }
    }

    fn status(&self) -> String {
        let stats = self.ctx.db().stats();
        format!(
            "Database status:\n\
             \x20 Connections: {}\n\
             \x20 Entries: {}\n\
             \x20 Cache size: {}\n\
             \x20 Chunks loaded: {}\n\
             \x20 Estimated capacity: {} entries\n\
             \x20 Used: {}%",
            self.ctx.stats().active(),
            stats.entries,
            stats.cache_size,
            stats.chunks,
            stats.capacity,
            stats.used_percent,
        )
    }

    fn self_test(&self) -> String {
        let stamp = now_millis();
        let key = format!("__selftest_{}", stamp);
        let expected = Bytes::from(format!("Test data: {}", stamp));

        let probe_key = key.clone();
        let probe = expected.clone();
        let result = run_blocking(self.ctx.executor(), move |db| {
            db.write(&probe_key, probe)?;
            let read = db.read(&probe_key);
            db.delete(&probe_key)?;
            read
        });

        match result {
            Ok(value) if value == expected => "Self test passed.".to_string(),
            Ok(_) => {
                warn!(key = %key, "Self test read back different data");
                "Self test failed: data mismatch.".to_string()
            }
            Err(e) => format!("Self test failed: {}", e),
        }
    }

    fn clear(&self, caller: &Caller) -> String {
        if *caller != Caller::Console {
            warn!(caller = caller.name(), "Refused clear from non-console caller");
            return "This command can only be run from the server console.".to_string();
        }
        match run_blocking(self.ctx.executor(), |db| db.clear_all()) {
            Ok(count) => format!("Cleared {} entries.", count),
            Err(e) => format!("Clear failed: {}", e),
        }
    }

    fn reload(&self) -> String {
        let Some(path) = &self.config_path else {
            return "No configuration file to reload.".to_string();
        };
        match Config::load(path) {
            Ok(config) => {
                self.ctx.apply_config(config);
                "Configuration reloaded.".to_string()
            }
            Err(e) => format!("Reload failed: {:#}", e),
        }
    }

    fn access(&self, args: &[&str]) -> String {
        match args {
            ["grant", id] => match self.acl.grant_access(id) {
                Ok(()) => format!("Granted database access to {}.", id),
                Err(e) => format!("Failed to grant access: {:#}", e),
            },
            ["revoke", id] => match self.acl.revoke_access(id) {
                Ok(()) => format!("Revoked database access from {}.", id),
                Err(e) => format!("Failed to revoke access: {:#}", e),
            },
            ["list"] => format_list("Database access", &self.acl.access_list()),
            _ => "Usage: access grant|revoke|list [id]".to_string(),
        }
    }

    fn admin(&self, args: &[&str]) -> String {
        match args {
            ["add", id] => match self.acl.add_admin(id) {
                Ok(()) => format!("{} is now an admin.", id),
                Err(e) => format!("Failed to add admin: {:#}", e),
            },
            ["remove", id] => match self.acl.remove_admin(id) {
                Ok(()) => format!("{} is no longer an admin.", id),
                Err(e) => format!("Failed to remove admin: {:#}", e),
            },
            ["list"] => format_list("Admins", &self.acl.admins()),
            _ => "Usage: admin add|remove|list [id]".to_string(),
        }
    }
}

fn format_list(title: &str, ids: &[String]) -> String {
    if ids.is_empty() {
        return format!("{}: (none)", title);
    }
    format!("{}: {}", title, ids.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridBounds, MemoryGrid, Position};
    use crate::permissions::PermissionStore;
    use std::io::Write;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.logging.log_operations = false;
        config
    }

    fn create_console(config_path: Option<PathBuf>) -> (Console, Arc<ServerContext>, Arc<PermissionStore>) {
        let grid = MemoryGrid::new(GridBounds::new(Position::new(0, 0, 0), Position::new(15, 3, 15)));
        let ctx = ServerContext::open(test_config(), Box::new(grid)).unwrap();
        let acl = Arc::new(PermissionStore::in_memory());
        let console = Console::new(Arc::clone(&ctx), acl.clone(), config_path);
        (console, ctx, acl)
    }

    fn alice() -> Caller {
        Caller::Identity("alice".to_string())
    }

    #[test]
    fn test_help_and_unknown() {
        let (console, _, _) = create_console(None);
        assert!(console.execute(&Caller::Console, "help").contains("access grant|revoke|list"));
        assert!(console.execute(&Caller::Console, "frobnicate").starts_with("Unknown command"));
        assert_eq!(console.execute(&Caller::Console, "   "), "");
    }

    #[test]
    fn test_status_reports_entries() {
        let (console, ctx, _) = create_console(None);
        ctx.db().write("a", Bytes::from_static(b"1")).unwrap();
        ctx.db().write("b", Bytes::from_static(b"2")).unwrap();

        let status = console.execute(&Caller::Console, "status");
        assert!(status.contains("Entries: 2"), "{}", status);
        assert!(status.contains("Connections: 0"), "{}", status);
    }

    #[test]
    fn test_self_test_leaves_nothing_behind() {
        let (console, ctx, _) = create_console(None);
        assert_eq!(console.execute(&Caller::Console, "test"), "Self test passed.");
        assert_eq!(ctx.db().entry_count(), 0);
    }

    #[test]
    fn test_clear_is_console_only() {
        let (console, ctx, acl) = create_console(None);
        ctx.db().write("a", Bytes::from_static(b"1")).unwrap();
        acl.add_admin("alice").unwrap();

        let refused = console.execute(&alice(), "clear");
        assert_eq!(refused, "This command can only be run from the server console.");
        assert_eq!(ctx.db().entry_count(), 1);

        assert_eq!(console.execute(&Caller::Console, "clear"), "Cleared 1 entries.");
        assert_eq!(ctx.db().entry_count(), 0);
    }

    #[test]
    fn test_identity_needs_rights() {
        let (console, _, acl) = create_console(None);

        assert_eq!(console.execute(&alice(), "status"), NO_PERMISSION);
        assert_eq!(console.execute(&alice(), "access grant bob"), NO_PERMISSION);

        acl.grant_access("alice").unwrap();
        assert!(console.execute(&alice(), "status").starts_with("Database status"));
        assert_eq!(console.execute(&alice(), "admin list"), NO_PERMISSION);

        acl.add_admin("alice").unwrap();
        assert_eq!(console.execute(&alice(), "access grant bob"), "Granted database access to bob.");
        assert!(acl.has_access("bob"));
    }

    #[test]
    fn test_access_and_admin_commands() {
        let (console, _, acl) = create_console(None);

        console.execute(&Caller::Console, "access grant bob");
        console.execute(&Caller::Console, "access grant carol");
        assert_eq!(
            console.execute(&Caller::Console, "access list"),
            "Database access: bob, carol"
        );
        console.execute(&Caller::Console, "access revoke bob");
        assert_eq!(console.execute(&Caller::Console, "access list"), "Database access: carol");

        assert_eq!(console.execute(&Caller::Console, "admin list"), "Admins: (none)");
        console.execute(&Caller::Console, "admin add dave");
        assert!(acl.is_admin("dave"));
        console.execute(&Caller::Console, "admin remove dave");
        assert!(!acl.is_admin("dave"));

        assert!(console.execute(&Caller::Console, "access grant").starts_with("Usage"));
    }

    #[test]
    fn test_reload_applies_token_and_cache() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nauth_token = \"rotated\"\n\n[cache]\nsize = 0").unwrap();

        let (console, ctx, _) = create_console(Some(file.path().to_path_buf()));
        ctx.db().write("a", Bytes::from_static(b"1")).unwrap();
        assert_eq!(ctx.db().cache_size(), 1);

        assert_eq!(console.execute(&Caller::Console, "reload"), "Configuration reloaded.");
        assert_eq!(ctx.auth_token(), "rotated");
        assert_eq!(ctx.db().cache_size(), 0);
    }

    #[test]
    fn test_reload_without_file() {
        let (console, _, _) = create_console(None);
        assert_eq!(
            console.execute(&Caller::Console, "reload"),
            "No configuration file to reload."
        );
    }

    #[test]
    fn test_console_changes_visible_to_async_callers() {
        let (console, ctx, _) = create_console(None);
        console.execute(&Caller::Console, "clear");

        let executor = ctx.executor().clone();
        let count = tokio_test::block_on(async move {
            executor
                .run(|db| {
                    db.write("after", Bytes::from_static(b"x"))?;
                    Ok(db.entry_count())
                })
                .await
        })
        .unwrap();
        assert_eq!(count, 1);
    }
}
