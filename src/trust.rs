//! Trust anchors for TLS connections to the directory.
use std::{fmt, sync::Arc, time::SystemTime};

use rustls::{
	client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier},
	Certificate, CertificateError, ClientConfig, RootCertStore, ServerName,
};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::Error;

/// Build the TLS client configuration for a directory.
///
/// Without a certificate the platform trust store is used. With one, that
/// certificate is the only trust anchor; the platform roots are not
/// consulted, and the directory's host name is not matched against it.
/// Only the first certificate of the PEM text is used.
pub fn client_config(certificate: Option<&str>) -> Result<Arc<ClientConfig>, Error> {
	let builder = ClientConfig::builder().with_safe_defaults();
	let config = match certificate.map(str::trim).filter(|pem| !pem.is_empty()) {
		Some(pem) => builder
			.with_custom_certificate_verifier(Arc::new(PinnedCertVerifier::new(pem)?))
			.with_no_client_auth(),
		None => builder.with_root_certificates(platform_roots()?).with_no_client_auth(),
	};
	Ok(Arc::new(config))
}

/// Accepts exactly the chains anchored at one pinned certificate.
///
/// Directories with internal or self-signed certificates rarely carry their
/// host name in the certificate, so a name mismatch is tolerated. Chain and
/// validity period checks still apply.
pub(crate) struct PinnedCertVerifier {
	/// The pinned certificate
	pinned: Certificate,
	/// Chain verification against the pinned certificate
	webpki: WebPkiVerifier,
}

impl fmt::Debug for PinnedCertVerifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PinnedCertVerifier").finish_non_exhaustive()
	}
}

impl PinnedCertVerifier {
	/// Pin the first certificate of `pem`.
	pub(crate) fn new(pem: &str) -> Result<Self, Error> {
		let pinned = first_certificate(pem)?;
		let mut roots = RootCertStore::empty();
		roots.add(&pinned).map_err(|err| Error::CertificateParse(err.to_string()))?;
		Ok(Self { pinned, webpki: WebPkiVerifier::new(roots, None) })
	}
}

impl ServerCertVerifier for PinnedCertVerifier {
	fn verify_server_cert(
		&self,
		end_entity: &Certificate,
		intermediates: &[Certificate],
		server_name: &ServerName,
		scts: &mut dyn Iterator<Item = &[u8]>,
		ocsp_response: &[u8],
		now: SystemTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		// A self-signed certificate presented as is
		if end_entity.0 == self.pinned.0 {
			check_validity(end_entity, now)?;
			return Ok(ServerCertVerified::assertion());
		}

		match self.webpki.verify_server_cert(
			end_entity,
			intermediates,
			server_name,
			scts,
			ocsp_response,
			now,
		) {
			Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)) => {
				debug!(?server_name, "Accepting pinned certificate chain issued for another name");
				Ok(ServerCertVerified::assertion())
			}
			result => result,
		}
	}
}

/// Fail unless `now` lies within the validity period of `cert`.
fn check_validity(cert: &Certificate, now: SystemTime) -> Result<(), rustls::Error> {
	let (_, parsed) = x509_parser::parse_x509_certificate(&cert.0)
		.map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;
	let validity = parsed.validity();
	let now = OffsetDateTime::from(now);
	if validity.not_after.to_datetime() < now {
		return Err(rustls::Error::InvalidCertificate(CertificateError::Expired));
	}
	if validity.not_before.to_datetime() > now {
		return Err(rustls::Error::InvalidCertificate(CertificateError::NotValidYet));
	}
	Ok(())
}

/// The first certificate of a PEM text.
fn first_certificate(pem: &str) -> Result<Certificate, Error> {
	rustls_pemfile::certs(&mut pem.as_bytes())
		.map_err(|err| Error::CertificateParse(err.to_string()))?
		.into_iter()
		.next()
		.map(Certificate)
		.ok_or_else(|| Error::CertificateParse("no PEM encoded certificate found".to_owned()))
}

/// The platform's trusted roots.
fn platform_roots() -> Result<RootCertStore, Error> {
	let certs: Vec<Vec<u8>> =
		rustls_native_certs::load_native_certs()?.into_iter().map(|cert| cert.0).collect();

	let mut roots = RootCertStore::empty();
	let (added, ignored) = roots.add_parsable_certificates(&certs);
	debug!(added, ignored, "Loaded platform trust roots");
	Ok(roots)
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used, clippy::expect_used)]

	use std::time::{Duration, SystemTime};

	use rustls::{client::ServerCertVerifier, CertificateError, ServerName};

	use super::{client_config, first_certificate, PinnedCertVerifier};
	use crate::{
		error::Error,
		validation::tests::{EXPIRED_CERT, VALID_CERT},
	};

	fn verify(
		pinned: &str,
		presented: &str,
		host: &str,
		now: SystemTime,
	) -> Result<(), rustls::Error> {
		let verifier = PinnedCertVerifier::new(pinned).unwrap();
		verifier
			.verify_server_cert(
				&first_certificate(presented).unwrap(),
				&[],
				&ServerName::try_from(host).unwrap(),
				&mut std::iter::empty(),
				&[],
				now,
			)
			.map(drop)
	}

	#[test]
	fn pins_single_certificate() {
		client_config(Some(VALID_CERT)).unwrap();
	}

	#[test]
	fn accepts_pinned_certificate_for_any_host() {
		verify(VALID_CERT, VALID_CERT, "localhost", SystemTime::now()).unwrap();
		verify(VALID_CERT, VALID_CERT, "ldap.example.com", SystemTime::now()).unwrap();
	}

	#[test]
	fn rejects_other_certificates() {
		let err = verify(EXPIRED_CERT, VALID_CERT, "localhost", SystemTime::now()).unwrap_err();
		assert!(matches!(err, rustls::Error::InvalidCertificate(_)), "{err}");
	}

	#[test]
	fn rejects_pinned_certificate_outside_validity() {
		let err = verify(EXPIRED_CERT, EXPIRED_CERT, "localhost", SystemTime::now()).unwrap_err();
		assert_eq!(err, rustls::Error::InvalidCertificate(CertificateError::Expired));

		// 1990, before the certificate was issued
		let past = SystemTime::UNIX_EPOCH + Duration::from_secs(631_152_000);
		let err = verify(VALID_CERT, VALID_CERT, "localhost", past).unwrap_err();
		assert_eq!(err, rustls::Error::InvalidCertificate(CertificateError::NotValidYet));
	}

	#[test]
	fn expired_certificate_still_parses() {
		// Expiry is enforced during the handshake, not when loading.
		client_config(Some(EXPIRED_CERT)).unwrap();
	}

	#[test]
	fn rejects_garbage() {
		assert!(matches!(client_config(Some("random-text")), Err(Error::CertificateParse(_))));
		assert!(matches!(
			client_config(Some("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n")),
			Err(Error::CertificateParse(_))
		));
	}
}
