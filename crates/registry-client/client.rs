use std::thread;
use std::time::Duration;

use curl::easy::{Easy, List};
use prost::Message;

use crate::error::ClientError;
use crate::wire;

const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Per-repository parameters the client needs to make a request. Owned by
/// the caller's state container (spec §4H); this crate never reads it
/// from the environment itself.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub url: String,
    pub auth_key: Option<String>,
    pub no_verify_signature: bool,
    pub no_verify_origin: bool,
}

#[derive(Debug)]
pub enum PackageFetch {
    NotModified,
    Fresh { body: Vec<u8>, etag: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Dependency {
    pub package: String,
    pub requirement: String,
    pub optional: bool,
    pub app: String,
    pub repository: String,
}

#[derive(Debug, Clone)]
pub struct RetirementStatus {
    pub reason: wire::RetirementReason,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Release {
    pub version: String,
    pub checksum: Vec<u8>,
    pub dependencies: Vec<Dependency>,
    pub retired: Option<RetirementStatus>,
}

fn classify_curl_error(e: curl::Error) -> ClientError {
    if e.is_couldnt_connect() || e.is_operation_timedout() || e.is_recv_error() || e.is_send_error()
    {
        ClientError::HttpTransient(e.to_string())
    } else {
        ClientError::HttpPermanent {
            status: 0,
            message: e.to_string(),
        }
    }
}

fn perform_get(
    url: &str,
    if_none_match: Option<&str>,
    auth_key: Option<&str>,
) -> Result<(u32, Vec<u8>, Option<String>), ClientError> {
    let mut handle = Easy::new();
    handle.url(url).map_err(classify_curl_error)?;
    handle.useragent("hexcore/0.1").ok();

    let mut headers = List::new();
    if let Some(etag) = if_none_match {
        headers
            .append(&format!("If-None-Match: {etag}"))
            .map_err(classify_curl_error)?;
    }
    if let Some(key) = auth_key {
        headers
            .append(&format!("Authorization: {key}"))
            .map_err(classify_curl_error)?;
    }
    handle.http_headers(headers).map_err(classify_curl_error)?;

    let mut body = Vec::new();
    let mut resp_etag = None;
    {
        let mut transfer = handle.transfer();
        transfer
            .write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(classify_curl_error)?;
        transfer
            .header_function(|line| {
                if let Ok(text) = std::str::from_utf8(line) {
                    let lower = text.to_ascii_lowercase();
                    if let Some(value) = lower.strip_prefix("etag:") {
                        resp_etag = Some(value.trim().trim_matches('"').to_string());
                    }
                }
                true
            })
            .map_err(classify_curl_error)?;
        transfer.perform().map_err(classify_curl_error)?;
    }

    let status = handle.response_code().map_err(classify_curl_error)?;
    Ok((status, body, resp_etag))
}

/// Retries transient failures (connection reset, 5xx) up to
/// [`MAX_RETRIES`] times with a fixed backoff; 4xx is final (spec §4B).
fn get_with_retry(
    url: &str,
    if_none_match: Option<&str>,
    auth_key: Option<&str>,
) -> Result<(u32, Vec<u8>, Option<String>), ClientError> {
    let mut attempt = 0;
    loop {
        match perform_get(url, if_none_match, auth_key) {
            Ok((status, body, etag)) if (500..600).contains(&status) => {
                if attempt >= MAX_RETRIES {
                    return Err(ClientError::HttpPermanent {
                        status,
                        message: format!("GET {url} failed after {attempt} retries"),
                    });
                }
                attempt += 1;
                thread::sleep(RETRY_BACKOFF);
                continue;
            }
            Ok(ok) => return Ok(ok),
            Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                attempt += 1;
                thread::sleep(RETRY_BACKOFF);
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

fn join(base: &str, segments: &[&str]) -> Result<String, ClientError> {
    let mut url = url::Url::parse(base).map_err(|e| ClientError::BadPublicKey(format!("invalid repository url {base:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ClientError::BadPublicKey(format!("repository url {base:?} cannot be a base")))?
        .pop_if_empty()
        .extend(segments.iter().copied());
    Ok(url.to_string())
}

/// `GET {repo.url}/packages/{name}`, honoring `If-None-Match` (spec §4B).
pub fn get_package(
    repo: &RepoConfig,
    name: &str,
    etag: Option<&str>,
) -> Result<PackageFetch, ClientError> {
    let url = join(&repo.url, &["packages", name])?;
    let (status, body, new_etag) = get_with_retry(&url, etag, repo.auth_key.as_deref())?;
    match status {
        304 => Ok(PackageFetch::NotModified),
        200 => Ok(PackageFetch::Fresh {
            body,
            etag: new_etag,
        }),
        s => Err(ClientError::HttpPermanent {
            status: s,
            message: format!("GET {url} returned {s}"),
        }),
    }
}

/// `GET {repo.url}/tarballs/{name}-{version}.tar`.
pub fn get_tarball(repo: &RepoConfig, name: &str, version: &str) -> Result<Vec<u8>, ClientError> {
    let url = join(&repo.url, &["tarballs", &format!("{name}-{version}.tar")])?;
    let (status, body, _) = get_with_retry(&url, None, repo.auth_key.as_deref())?;
    if status == 200 {
        Ok(body)
    } else {
        Err(ClientError::HttpPermanent {
            status,
            message: format!("GET {url} returned {status}"),
        })
    }
}

/// `GET {repo_url}/public_key`, PEM-encoded.
pub fn get_public_key(repo_url: &str) -> Result<Vec<u8>, ClientError> {
    let url = join(repo_url, &["public_key"])?;
    let (status, body, _) = get_with_retry(&url, None, None)?;
    if status == 200 {
        Ok(body)
    } else {
        Err(ClientError::HttpPermanent {
            status,
            message: format!("GET {url} returned {status}"),
        })
    }
}

/// Decodes the `Signed` envelope and verifies its signature (RSA-SHA512)
/// against `public_key_der` unless `repo.no_verify_signature` is set.
/// Returns the inner payload bytes.
pub fn verify(
    envelope_bytes: &[u8],
    repo: &RepoConfig,
    public_key_der: Option<&[u8]>,
) -> Result<Vec<u8>, ClientError> {
    let signed = wire::Signed::decode(envelope_bytes)?;

    if repo.no_verify_signature {
        tracing::warn!(repo = %repo.url, "signature verification disabled for this repository");
        return Ok(signed.payload);
    }

    let der = public_key_der
        .ok_or_else(|| ClientError::BadPublicKey("no public key configured for repository".into()))?;
    let key = ring::signature::UnparsedPublicKey::new(&ring::signature::RSA_PKCS1_2048_8192_SHA512, der);
    key.verify(&signed.payload, &signed.signature)
        .map_err(|_| ClientError::BadSignature)?;

    Ok(signed.payload)
}

/// Decodes the `Package` protobuf payload into the public [`Release`] list,
/// checking origin (`payload.repository`/`payload.name`) unless
/// `no_verify_origin` is set (spec §4B).
pub fn decode_package(
    payload: &[u8],
    expected_repo: &str,
    expected_name: &str,
    no_verify_origin: bool,
) -> Result<Vec<Release>, ClientError> {
    let pkg = wire::Package::decode(payload)?;

    if !no_verify_origin && (pkg.repository != expected_repo || pkg.name != expected_name) {
        return Err(ClientError::OriginMismatch {
            expected_repo: expected_repo.to_string(),
            expected_name: expected_name.to_string(),
            got_repo: pkg.repository,
            got_name: pkg.name,
        });
    }

    Ok(pkg
        .releases
        .into_iter()
        .map(|r| Release {
            version: r.version,
            checksum: r.inner_checksum,
            dependencies: r
                .dependencies
                .into_iter()
                .map(|d| Dependency {
                    package: d.package,
                    requirement: d.requirement,
                    optional: d.optional,
                    app: d.app,
                    repository: d.repository,
                })
                .collect(),
            retired: r.retired.map(|rs| RetirementStatus {
                reason: wire::RetirementReason::try_from(rs.reason)
                    .unwrap_or(wire::RetirementReason::Other),
                message: rs.message,
            }),
        })
        .collect())
}
