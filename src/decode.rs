use std::io;

use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZlibDecoder, ZstdDecoder};
use futures::TryStreamExt;
use reqwest::{
    Response,
    header::{CONTENT_ENCODING, HeaderMap, HeaderName, TRANSFER_ENCODING},
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;

use crate::error::DownloadError;

pub(crate) const ACCEPT_ENCODING: &str = "gzip, deflate, br, zstd";

pub(crate) type BodyReader = Box<dyn AsyncBufRead + Send + Unpin>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Coding {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
}

impl Coding {
    fn parse(token: &str) -> Result<Option<Coding>, DownloadError> {
        match token.to_ascii_lowercase().as_str() {
            "" | "identity" | "chunked" => Ok(None),
            "gzip" | "x-gzip" => Ok(Some(Coding::Gzip)),
            "deflate" => Ok(Some(Coding::Deflate)),
            "br" => Ok(Some(Coding::Brotli)),
            "zstd" => Ok(Some(Coding::Zstd)),
            other => Err(DownloadError::UnsupportedEncoding {
                encoding: other.to_string(),
            }),
        }
    }

    fn wrap(self, inner: BodyReader) -> BodyReader {
        match self {
            Coding::Gzip => {
                let mut decoder = GzipDecoder::new(inner);
                decoder.multiple_members(true);
                Box::new(BufReader::new(decoder))
            }
            Coding::Deflate => Box::new(BufReader::new(ZlibDecoder::new(inner))),
            Coding::Brotli => Box::new(BufReader::new(BrotliDecoder::new(inner))),
            Coding::Zstd => Box::new(BufReader::new(ZstdDecoder::new(inner))),
        }
    }
}

fn codings_in(headers: &HeaderMap, name: HeaderName) -> Result<Vec<Coding>, DownloadError> {
    let mut codings = Vec::new();

    for value in headers.get_all(name) {
        let value = value
            .to_str()
            .map_err(|_| DownloadError::UnsupportedEncoding {
                encoding: String::from_utf8_lossy(value.as_bytes()).into_owned(),
            })?;

        for token in value.split(',') {
            if let Some(coding) = Coding::parse(token.trim())? {
                codings.push(coding);
            }
        }
    }

    Ok(codings)
}

/// Codings in the order the sender applied them: content codings first, then
/// any transfer codings other than `chunked`, which hyper already removed.
pub(crate) fn applied_codings(headers: &HeaderMap) -> Result<Vec<Coding>, DownloadError> {
    let mut codings = codings_in(headers, CONTENT_ENCODING)?;
    codings.extend(codings_in(headers, TRANSFER_ENCODING)?);
    Ok(codings)
}

/// Stack decoders over a raw byte reader so that reading yields the original
/// content. Decoders are applied in reverse of the order they were encoded.
///
/// A body that is empty on the wire is empty content, whatever the headers
/// claim; servers label zero-length responses with their usual coding.
pub(crate) async fn decoding_reader(
    mut raw: BodyReader,
    codings: &[Coding],
) -> io::Result<BodyReader> {
    if codings.is_empty() || raw.fill_buf().await?.is_empty() {
        return Ok(raw);
    }

    Ok(codings
        .iter()
        .rev()
        .fold(raw, |reader, coding| coding.wrap(reader)))
}

/// Take ownership of a response and hand back its content-decoded body.
/// Dropping the reader releases the connection.
pub(crate) async fn decoded_body(response: Response) -> Result<BodyReader, DownloadError> {
    let codings = applied_codings(response.headers())?;
    let url = response.url().clone();
    let stream = response.bytes_stream().map_err(io::Error::other);

    decoding_reader(Box::new(StreamReader::new(Box::pin(stream))), &codings)
        .await
        .map_err(|err| DownloadError::stream(&url, err))
}
