//! [`Store`] bundle over a single SurrealDB connection.

use podfleet_core::repository::Store;
use surrealdb::{Connection, Surreal};

use crate::repository::{
    SurrealAuditRepository, SurrealCertificateRepository, SurrealDnsRepository,
    SurrealJobRepository, SurrealPodRepository, SurrealServerRepository,
};

/// Every SurrealDB repository, sharing one client.
pub struct SurrealStore<C: Connection> {
    db: Surreal<C>,
    servers: SurrealServerRepository<C>,
    pods: SurrealPodRepository<C>,
    dns: SurrealDnsRepository<C>,
    certificates: SurrealCertificateRepository<C>,
    jobs: SurrealJobRepository<C>,
    audit: SurrealAuditRepository<C>,
}

impl<C: Connection> SurrealStore<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self {
            servers: SurrealServerRepository::new(db.clone()),
            pods: SurrealPodRepository::new(db.clone()),
            dns: SurrealDnsRepository::new(db.clone()),
            certificates: SurrealCertificateRepository::new(db.clone()),
            jobs: SurrealJobRepository::new(db.clone()),
            audit: SurrealAuditRepository::new(db.clone()),
            db,
        }
    }

    pub fn client(&self) -> &Surreal<C> {
        &self.db
    }
}

impl<C: Connection> Clone for SurrealStore<C> {
    fn clone(&self) -> Self {
        Self::new(self.db.clone())
    }
}

impl<C: Connection + 'static> Store for SurrealStore<C> {
    type Servers = SurrealServerRepository<C>;
    type Pods = SurrealPodRepository<C>;
    type Dns = SurrealDnsRepository<C>;
    type Certificates = SurrealCertificateRepository<C>;
    type Jobs = SurrealJobRepository<C>;
    type Audit = SurrealAuditRepository<C>;

    fn servers(&self) -> &Self::Servers {
        &self.servers
    }

    fn pods(&self) -> &Self::Pods {
        &self.pods
    }

    fn dns(&self) -> &Self::Dns {
        &self.dns
    }

    fn certificates(&self) -> &Self::Certificates {
        &self.certificates
    }

    fn jobs(&self) -> &Self::Jobs {
        &self.jobs
    }

    fn audit(&self) -> &Self::Audit {
        &self.audit
    }
}
