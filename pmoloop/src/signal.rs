//! Drapeaux de signaux POSIX
//!
//! Les handlers ne font qu'écrire dans un booléen atomique ; la boucle
//! observe les drapeaux entre deux itérations. SIGPIPE est ignoré.
//! Les mêmes drapeaux servent d'API de contrôle de boucle :
//! [`request_exit`] et [`request_reload`] sont appelables depuis un
//! callback ou un job de mailbox.

use std::sync::atomic::{AtomicBool, Ordering};

static SIGHUP_FLAG: AtomicBool = AtomicBool::new(false);
static EXIT_FLAG: AtomicBool = AtomicBool::new(false);
static RELOAD_FLAG: AtomicBool = AtomicBool::new(false);

/// Installe les handlers du processus (unix uniquement) :
/// SIGINT/SIGTERM/SIGQUIT demandent l'arrêt, SIGHUP lève le drapeau
/// de rechargement de configuration applicative, SIGPIPE est ignoré.
#[cfg(unix)]
pub fn install() {
    unsafe {
        libc::signal(libc::SIGINT, handle_exit as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_exit as libc::sighandler_t);
        libc::signal(libc::SIGQUIT, handle_exit as libc::sighandler_t);
        libc::signal(libc::SIGHUP, handle_sighup as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
pub fn install() {}

#[cfg(unix)]
extern "C" fn handle_exit(_signum: libc::c_int) {
    EXIT_FLAG.store(true, Ordering::Relaxed);
}

#[cfg(unix)]
extern "C" fn handle_sighup(_signum: libc::c_int) {
    SIGHUP_FLAG.store(true, Ordering::Relaxed);
}

/// Consomme le drapeau SIGHUP (lecture destructive).
pub fn take_sighup() -> bool {
    SIGHUP_FLAG.swap(false, Ordering::Relaxed)
}

/// Équivalent programmatique de SIGHUP (plateformes sans ce signal,
/// déclenchement applicatif).
pub fn raise_sighup() {
    SIGHUP_FLAG.store(true, Ordering::Relaxed);
}

pub fn exit_requested() -> bool {
    EXIT_FLAG.load(Ordering::Relaxed)
}

/// Consomme le drapeau de reload (lecture destructive).
pub fn take_reload() -> bool {
    RELOAD_FLAG.swap(false, Ordering::Relaxed)
}

/// Demande l'arrêt de la boucle à la fin de l'itération courante.
pub fn request_exit() {
    EXIT_FLAG.store(true, Ordering::Relaxed);
}

/// Demande un redémarrage complet (teardown puis reconstruction).
pub fn request_reload() {
    RELOAD_FLAG.store(true, Ordering::Relaxed);
}

/// Remet tous les drapeaux à zéro. À appeler avant chaque run
/// (l'hôte le fait au début de chaque cycle de reload).
pub fn reset() {
    SIGHUP_FLAG.store(false, Ordering::Relaxed);
    EXIT_FLAG.store(false, Ordering::Relaxed);
    RELOAD_FLAG.store(false, Ordering::Relaxed);
}

/// Les drapeaux sont globaux au processus : les tests qui les
/// manipulent se sérialisent sur ce verrou.
#[cfg(test)]
pub(crate) static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_consumed_once() {
        let _guard = test_guard();
        reset();
        request_reload();
        assert!(take_reload());
        assert!(!take_reload());

        request_exit();
        assert!(exit_requested());
        reset();
        assert!(!exit_requested());
    }
}
