use anyhow::Result;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::instrument;
use xcb::{
    Connection, Xid,
    x::{self, ATOM_ANY, Atom, GetProperty, GrabServer, InternAtom, UngrabServer, Window},
};

use super::{ForegroundWindow, WindowSource, executable_file_name};

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn get_pid(conn: &Connection, window: Window, pid_atom: Atom) -> Result<Option<u32>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property: pid_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result.value::<u32>().first().copied())
}

fn get_active_window(conn: &Connection, root: &Window, active_window_atom: Atom) -> Result<Option<Window>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window: *root,
        property: active_window_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result
        .value::<Window>()
        .first()
        .copied()
        .filter(|window| !window.is_none()))
}

fn get_name(conn: &Connection, window: Window, wm_name_atom: Atom) -> Result<String> {
    let wm_name = conn.wait_for_reply(conn.send_request(&x::GetProperty {
        delete: false,
        window,
        property: wm_name_atom,
        r#type: x::ATOM_ANY,
        long_offset: 0,
        long_length: 1024,
    }))?;
    Ok(String::from_utf8_lossy(wm_name.value()).to_string())
}

pub struct X11WindowSource {
    connection: Connection,
    preferred_screen: usize,
    active_window_atom: Atom,
    window_name_atom: Atom,
    pid_atom: Atom,
    system: System,
}

impl X11WindowSource {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = xcb::Connection::connect(None)?;
        let active_window_atom = intern_atom(&connection, b"_NET_ACTIVE_WINDOW")?;
        let window_name_atom = intern_atom(&connection, b"_NET_WM_NAME")?;
        let pid_atom = intern_atom(&connection, b"_NET_WM_PID")?;
        Ok(Self {
            connection,
            preferred_screen: preferred_screen.max(0) as usize,
            active_window_atom,
            window_name_atom,
            pid_atom,
            system: System::new(),
        })
    }

    fn executable_of(&mut self, pid: u32) -> Option<String> {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_exe(sysinfo::UpdateKind::OnlyIfNotSet),
        );
        let process = self.system.process(pid)?;
        process
            .exe()
            .and_then(|v| v.to_str())
            .map(executable_file_name)
            .or_else(|| Some(process.name().to_string_lossy().to_string()))
    }

    #[instrument(skip(self))]
    fn get_foreground_inner(&mut self) -> Result<Option<ForegroundWindow>> {
        let setup = self.connection.get_setup();

        // Currently the application only supports 1 x11 screen.
        let Some(screen) = setup.roots().nth(self.preferred_screen) else {
            return Ok(None);
        };
        let root = screen.root();

        let Some(active_window) =
            get_active_window(&self.connection, &root, self.active_window_atom)?
        else {
            return Ok(None);
        };
        let title = get_name(&self.connection, active_window, self.window_name_atom)?;
        let Some(pid) = get_pid(&self.connection, active_window, self.pid_atom)? else {
            return Ok(None);
        };
        let Some(executable_name) = self.executable_of(pid) else {
            return Ok(None);
        };
        Ok(Some(ForegroundWindow {
            title: title.into(),
            executable_name: executable_name.into(),
            pid,
        }))
    }
}

impl WindowSource for X11WindowSource {
    #[instrument(skip(self))]
    fn get_foreground(&mut self) -> Result<Option<ForegroundWindow>> {
        let _ = self.connection.send_request(&GrabServer {});
        let result = self.get_foreground_inner();
        let _ = self.connection.send_request(&UngrabServer {});
        result
    }
}
