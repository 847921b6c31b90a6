use super::piece_store::PieceStore;
use super::stores::StoreRegistry;
use crate::content_index::ContentLookup;
use crate::data_structures::ID;
use crate::error::Error;
use crate::protocol::{read_line, Refusal, Request, Response};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, instrument, trace, warn};

enum Session {
    Unauthenticated,
    Authenticated {
        content_id: ID,
        store: Arc<PieceStore>,
    },
}

struct ConnectionHandler {
    lookup: Arc<dyn ContentLookup>,
    stores: StoreRegistry,
    session: Session,
}

/// Serves one peer until it disconnects or breaks framing. Every connection
/// starts unauthenticated; nothing it does touches other connections.
#[instrument(skip_all, fields(peer = %peer))]
pub async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    lookup: Arc<dyn ContentLookup>,
    stores: StoreRegistry,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_stream, mut write_stream) = split(stream);
    let mut reader = BufReader::new(read_stream);

    let mut handler = ConnectionHandler {
        lookup,
        stores,
        session: Session::Unauthenticated,
    };

    loop {
        let line = match read_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("peer closed connection");
                break;
            }
            Err(e) => {
                warn!(?e);
                break;
            }
        };

        let request = Request::parse(&line);
        trace!(?request);

        let response = handler.respond(request).await;

        if let Err(e) = write_stream.write_all(&response).await {
            warn!(?e);
            break;
        }
    }
}

impl ConnectionHandler {
    async fn respond(&mut self, request: Request) -> Bytes {
        match request {
            Request::Probe => Response::Ok.into_bytes(),
            Request::Handshake(content_id) => {
                let outcome = match content_id {
                    Some(content_id) => self.authenticate(content_id).await,
                    None => Err(Refusal::InvalidContentId),
                };

                // any refused handshake drops an earlier binding
                match outcome {
                    Ok(()) => Response::Ok.into_bytes(),
                    Err(refusal) => {
                        self.session = Session::Unauthenticated;
                        Response::Error(refusal).into_bytes()
                    }
                }
            }
            Request::CheckPieces => match self.session {
                Session::Unauthenticated => {
                    Response::Error(Refusal::HandshakeRequired).into_bytes()
                }
                Session::Authenticated { .. } => Response::HavePieces.into_bytes(),
            },
            Request::Piece(index) => self.serve_piece(index).await,
            Request::Unknown(line) => {
                debug!(%line, "unknown request");
                Response::Error(Refusal::UnknownMessage).into_bytes()
            }
        }
    }

    async fn authenticate(&mut self, content_id: ID) -> Result<(), Refusal> {
        let Some(entry) = self.lookup.lookup(&content_id).await else {
            debug!(%content_id, "not seeding this content");
            return Err(Refusal::UnknownContentId);
        };

        let store = match self.stores.get_or_open(&entry).await {
            Ok(store) => store,
            Err(e) => {
                warn!(path = ?entry.path, ?e, "can't open seeded file");
                return Err(Refusal::UnableToProcessFile);
            }
        };

        debug!(
            %content_id,
            path = ?store.path(),
            pieces = store.piece_count(),
            "handshake accepted"
        );
        self.session = Session::Authenticated { content_id, store };

        Ok(())
    }

    async fn serve_piece(&self, index: Option<usize>) -> Bytes {
        let Session::Authenticated { content_id, store } = &self.session else {
            return Response::Error(Refusal::HandshakeRequired).into_bytes();
        };

        let Some(index) = index else {
            return Response::Error(Refusal::InvalidPieceIndex).into_bytes();
        };

        match store.piece_at(index).await {
            Ok((data, digest)) => {
                trace!(%content_id, index, size = data.len(), "serving piece");
                Response::Piece {
                    digest,
                    data: &data,
                }
                .into_bytes()
            }
            Err(Error::OutOfRange { .. }) => {
                Response::Error(Refusal::InvalidPieceIndex).into_bytes()
            }
            Err(e) => {
                warn!(%content_id, index, ?e);
                Response::Error(Refusal::UnreadablePiece).into_bytes()
            }
        }
    }
}
