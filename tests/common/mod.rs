use std::{
	collections::{HashMap, HashSet},
	error::Error,
	sync::{Arc, Mutex},
};

use async_trait::async_trait;
use ldap3::{LdapConnAsync, SearchEntry};
use ldap_authz::{
	error::Error as DirectoryError, Directory, DirectoryConfig, DirectoryConnector, SearchRequest,
};
use url::Url;

/// An operation the in-memory directory was asked to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
	Search(SearchRequest),
	Bind { dn: String, password: String },
}

#[derive(Debug, Default)]
struct State {
	/// Entries by search base and filter
	responses: HashMap<(String, String), Vec<SearchEntry>>,
	/// Passwords by DN
	passwords: HashMap<String, String>,
	/// Bases whose searches fail
	failing: HashSet<String>,
	calls: Vec<Call>,
}

/// In-memory directory answering searches with canned entries. Clones share
/// their state.
#[derive(Debug, Clone, Default)]
pub struct MockDirectory {
	state: Arc<Mutex<State>>,
}

impl MockDirectory {
	/// Answer searches of `base` with `filter` with `entries`.
	pub fn respond(&self, base: &str, filter: &str, entries: Vec<SearchEntry>) {
		self.state
			.lock()
			.unwrap()
			.responses
			.insert((base.to_owned(), filter.to_owned()), entries);
	}

	/// Add a user entry below `base`, found by the login filter `(uid=...)`.
	pub fn add_user(&self, base: &str, entry: SearchEntry, password: Option<&str>) {
		let uid = entry.attrs.get("uid").and_then(|v| v.first()).cloned().unwrap();
		if let Some(password) = password {
			self.state.lock().unwrap().passwords.insert(entry.dn.clone(), password.to_owned());
		}
		self.respond(base, &format!("(uid={uid})"), vec![entry]);
	}

	/// Make every search of `base` fail.
	pub fn fail(&self, base: &str) {
		self.state.lock().unwrap().failing.insert(base.to_owned());
	}

	pub fn calls(&self) -> Vec<Call> {
		self.state.lock().unwrap().calls.clone()
	}

	pub fn searches(&self) -> Vec<SearchRequest> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				Call::Search(request) => Some(request),
				Call::Bind { .. } => None,
			})
			.collect()
	}
}

#[async_trait]
impl Directory for MockDirectory {
	async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchEntry>, DirectoryError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::Search(request.clone()));
		if state.failing.contains(&request.base) {
			return Err(DirectoryError::Connection(format!("search of {} timed out", request.base)));
		}

		let entries = state
			.responses
			.get(&(request.base.clone(), request.filter.clone()))
			.cloned()
			.unwrap_or_default();
		let limit = if request.size_limit == 0 { usize::MAX } else { request.size_limit };
		Ok(entries.into_iter().take(limit).collect())
	}

	async fn bind(&self, dn: &str, password: &str) -> Result<(), DirectoryError> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::Bind { dn: dn.to_owned(), password: password.to_owned() });
		match state.passwords.get(dn) {
			// Unauthenticated bind
			_ if password.is_empty() => Ok(()),
			Some(expected) if expected == password => Ok(()),
			_ => Err(DirectoryError::InvalidCredentials { dn: dn.to_owned() }),
		}
	}
}

/// Hands out [`MockDirectory`]s by directory URL. Unknown URLs fail to
/// connect.
#[derive(Debug, Default)]
pub struct MockConnector {
	directories: HashMap<String, MockDirectory>,
	connects: Mutex<Vec<String>>,
}

impl MockConnector {
	/// Register a directory for `url` and return a handle to it.
	pub fn add(&mut self, url: &str) -> MockDirectory {
		let directory = MockDirectory::default();
		self.directories.insert(Url::parse(url).unwrap().to_string(), directory.clone());
		directory
	}

	/// URLs connected to, in order.
	pub fn connects(&self) -> Vec<String> {
		self.connects.lock().unwrap().clone()
	}
}

impl DirectoryConnector for MockConnector {
	type Directory = MockDirectory;

	fn connect(&self, config: &DirectoryConfig) -> Result<MockDirectory, DirectoryError> {
		let url = config.url.to_string();
		self.connects.lock().unwrap().push(url.clone());
		self.directories
			.get(&url)
			.cloned()
			.ok_or_else(|| DirectoryError::Connection(format!("{url} is unreachable")))
	}
}

/// An entry with single-valued attributes.
pub fn entry(dn: &str, attrs: &[(&str, &str)]) -> SearchEntry {
	entry_multi(dn, &attrs.iter().map(|(k, v)| (*k, vec![*v])).collect::<Vec<_>>())
}

/// An entry with multi-valued attributes.
pub fn entry_multi(dn: &str, attrs: &[(&str, Vec<&str>)]) -> SearchEntry {
	SearchEntry {
		dn: dn.to_owned(),
		attrs: attrs
			.iter()
			.map(|(k, v)| ((*k).to_owned(), v.iter().map(|v| (*v).to_owned()).collect()))
			.collect(),
		bin_attrs: HashMap::new(),
	}
}

/// A directory config with the fixture directory's conventions.
pub fn directory_config(url: &str, bases: &[&str]) -> DirectoryConfig {
	DirectoryConfig::new(
		Url::parse(url).unwrap(),
		bases.iter().map(|base| (*base).to_owned()).collect(),
		"uid={0}",
		"uid",
	)
}

/// Self-signed certificate that expired on 2019-08-26.
pub const EXPIRED_CERT: &str = "-----BEGIN CERTIFICATE-----
MIICwTCCAamgAwIBAgIECuCFsDANBgkqhkiG9w0BAQsFADARMQ8wDQYDVQQLEwZz
eXN0ZW0wHhcNMTcwODI2MDU1ODQwWhcNMTkwODI2MDU1ODQwWjARMQ8wDQYDVQQL
EwZzeXN0ZW0wggEiMA0GCSqGSIb3DQEBAQUAA4IBDwAwggEKAoIBAQCHfHQfswt9
oEkrjpkMPVFbTnqPkB4TSSwmK5/hzSxEiitc+HqMJyPqmdgqzcvnPnOqE4McUiA8
UX2VKB9cjOk4hfo+qJYqvXzkCRhnz2tbJJZEt2eXBiMDpOlHF1Amcsy0W+R6Ac+h
IfRq1h7JaVxfnmVjAuXh4JygKIZiUjjCWb5bX9BnMD5xVLlqTkXhuFgXW3ZRKU8T
QFWbRtFSKEKWkgh7A01jN3Jxn2CRMJBa9HCnECcfdGym7Qly/BtdmjYwqtnCweJ4
yG0CRshzZ6CMmDHst+VE25e0Ju1zHU/bIUjY+pos80rK+ox1toy9Fdc9PMLMw4Ph
GSnoWJhIKYj3AgMBAAGjITAfMB0GA1UdDgQWBBTijSEodc+jwyCvY4a0bQO+K0nl
IDANBgkqhkiG9w0BAQsFAAOCAQEAGZGrEMQYwrf8M7is5BngFNBXnuGWcp+RcBW/
VUVS0GEfrA4fLEf+VJd2+TxOgQHlGe0duJEyVRnpvYoNjFbmKWc5EGoIHYkTNdbh
m9zi8KReL17ktPsTnFcPw2a4rTbIjg2SEgo8wTaEtMT/P2ZSxGMr+1WFtjDEFN4c
yif96h8DOvo4JuP6E2V2pPic6Jb/aWGfpVEfRd513ymn3JuGReHCCaCs2hZzeONy
3Bhlnubk3tmoSf0Cj45LtKhc3RMHPMvDayc5BO5CZTWlLrK12rDmPYKffy7lLjO5
mPhe6p/SOAanBhL/+WwsYjPG8R/A0iQE1tUTsOy+Xo/xEyPpgw==
-----END CERTIFICATE-----
";

pub async fn ldap_connect() -> Result<ldap3::Ldap, Box<dyn Error>> {
	let (conn, mut ldap) = LdapConnAsync::new("ldap://localhost:1389").await?;
	let _handle = tokio::spawn(async move {
		if let Err(err) = conn.drive().await {
			panic!("Ldap connection error {err}");
		}
	});
	ldap.simple_bind("cn=admin,dc=example,dc=org", "adminpassword").await?;
	Ok(ldap)
}

pub async fn ldap_add_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={},dc=example,dc=org", ou),
		vec![("objectClass", ["organizationalUnit"].into())],
	)
	.await?
	.success()?;
	Ok(())
}

/// Delete an organizational unit and the users in it.
pub async fn ldap_delete_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	let base = format!("ou={},dc=example,dc=org", ou);
	let (entries, _res) = ldap
		.search(&base, ldap3::Scope::OneLevel, "(objectClass=*)", vec!["dn"])
		.await?
		.success()?;
	for entry in entries {
		ldap.delete(&SearchEntry::construct(entry).dn).await?.success()?;
	}
	ldap.delete(&base).await?.success()?;
	Ok(())
}

pub async fn ldap_add_user(
	ldap: &mut ldap3::Ldap,
	ou: &str,
	uid: &str,
	cn: &str,
	mail: &str,
	password: &str,
) -> Result<(), Box<dyn Error>> {
	let sn = cn.rsplit(' ').next().unwrap_or(cn);
	ldap.add(
		&format!("uid={},ou={},dc=example,dc=org", uid, ou),
		vec![
			("objectClass", ["inetOrgPerson"].into()),
			("uid", [uid].into()),
			("cn", [cn].into()),
			("sn", [sn].into()),
			("mail", [mail].into()),
			("userPassword", [password].into()),
		],
	)
	.await?
	.success()?;
	Ok(())
}
