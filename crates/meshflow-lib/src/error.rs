use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    KubeError {
        #[from]
        source: kube::Error,
    },

    #[error("{0} watch stream ended")]
    WatchEnded(&'static str),

    #[error("Pipeline queue closed: {0}")]
    PipelineClosed(&'static str),

    #[error("Delivery failed for {failed}/{total} subscribers")]
    DeliveryError { failed: usize, total: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
