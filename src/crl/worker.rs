use crate::crl::error::CrlError;
use crate::crl::validator::CrlValidator;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

pub struct CrlWorkerRequest {
    pub chains: Vec<Vec<Vec<u8>>>,
    pub validator: Arc<CrlValidator>,
    pub reply: mpsc::Sender<Result<(), CrlError>>,
}

/// Bridge between the synchronous TLS verification callback and the async
/// validator: a dedicated thread running a current-thread runtime processes
/// validation requests one at a time.
pub struct CrlWorker {
    tx: Sender<CrlWorkerRequest>,
}

static GLOBAL_WORKER: OnceCell<CrlWorker> = OnceCell::new();

impl CrlWorker {
    pub fn global() -> &'static CrlWorker {
        GLOBAL_WORKER.get_or_init(|| {
            let (tx, rx): (Sender<CrlWorkerRequest>, Receiver<CrlWorkerRequest>) = mpsc::channel();

            std::thread::Builder::new()
                .name("crl-worker".into())
                .spawn(move || {
                    let rt = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("Failed to create CRL worker runtime");

                    rt.block_on(async move {
                        while let Ok(req) = rx.recv() {
                            let res = req
                                .validator
                                .verify_peer_certificates(&[], &req.chains)
                                .await;
                            let _ = req.reply.send(res);
                        }
                    });
                })
                .expect("Failed to spawn CRL worker thread");

            CrlWorker { tx }
        })
    }

    pub fn validate(
        &self,
        validator: Arc<CrlValidator>,
        chains: Vec<Vec<Vec<u8>>>,
    ) -> Result<(), CrlError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let msg = CrlWorkerRequest {
            chains,
            validator,
            reply: reply_tx,
        };
        self.tx.send(msg).expect("CRL worker channel closed");
        reply_rx.recv().expect("CRL worker reply channel closed")
    }
}
