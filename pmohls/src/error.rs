//! Types d'erreurs pour pmohls

/// Erreurs de construction du segmenteur.
///
/// Les erreurs d'écriture en cours de route (segment, playlist) ne
/// passent pas par ce type : elles sont journalisées et le pipeline
/// continue, l'ouverture suivante retente.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("option 'path' is required")]
    MissingPath,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Type Result spécialisé pour pmohls
pub type Result<T> = std::result::Result<T, Error>;
