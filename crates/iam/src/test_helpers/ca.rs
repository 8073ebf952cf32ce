//! Local certificate authority for signing module CSRs in tests.

use rcgen::{
	BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
	DistinguishedName, DnType, IsCa, KeyPair, SerialNumber,
};

pub struct TestCa {
	key_pair: KeyPair,
	cert: Certificate,
}

impl TestCa {
	pub fn new() -> anyhow::Result<Self> {
		let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

		let mut params = CertificateParams::default();
		let mut dn = DistinguishedName::new();
		dn.push(DnType::CommonName, "Test CA");
		dn.push(DnType::OrganizationName, "cluster.local");
		params.distinguished_name = dn;
		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

		let cert = params.self_signed(&key_pair)?;

		Ok(Self { key_pair, cert })
	}

	pub fn cert_pem(&self) -> String {
		self.cert.pem()
	}

	/// Signs a PEM CSR into a leaf certificate with the given serial,
	/// valid for `valid_days`.
	pub fn sign_csr(&self, csr_pem: &str, serial: &[u8], valid_days: i64) -> anyhow::Result<String> {
		let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)?;

		csr.params.serial_number = Some(SerialNumber::from(serial.to_vec()));
		csr.params.not_before = time::OffsetDateTime::now_utc();
		csr.params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(valid_days);

		let cert = csr.signed_by(&self.cert, &self.key_pair)?;

		Ok(cert.pem())
	}

	/// Signs a CSR and returns the leaf-first `leaf + CA` PEM chain.
	pub fn issue_chain(&self, csr_pem: &str, serial: &[u8], valid_days: i64) -> anyhow::Result<String> {
		let leaf = self.sign_csr(csr_pem, serial, valid_days)?;

		Ok(format!("{leaf}{}", self.cert_pem()))
	}
}
