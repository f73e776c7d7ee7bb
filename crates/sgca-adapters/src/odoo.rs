use std::fmt;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sgca_core::{BacklogCategory, BacklogItem, BacklogReport, CompanyMapping, Source};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use tracing::{debug, info_span, Instrument};

use crate::{AdapterError, SourceAdapter};

// Text casts keep decoding independent of the Odoo version: journal names
// became jsonb translations and amounts are numeric.
const SII_PENDING_SQL: &str = "
    SELECT a.id::text, a.date::date, b.doc_code_prefix::text, a.number::text,
           a.new_partner::text, COALESCE(a.amount, 0)::float8
    FROM mail_message_dte_document a
    JOIN sii_document_class b ON a.document_class_id = b.id
    WHERE a.state = 'draft'
    ORDER BY a.date DESC";

const DRAFT_MOVES_SQL: &str = "
    SELECT am.id::text, am.date::date, aj.name::text, am.name::text,
           rp.name::text, am.ref::text
    FROM account_move am
    JOIN account_journal aj ON am.journal_id = aj.id
    LEFT JOIN res_partner rp ON am.partner_id = rp.id
    WHERE am.state = 'draft'
    ORDER BY am.date DESC";

const OPEN_STATEMENT_LINES_SQL: &str = "
    SELECT abl.id::text, abl.date::date, aj.name::text, abl.name::text,
           rp.name::text, COALESCE(abl.amount, 0)::float8, abl.ref::text
    FROM account_bank_statement_line abl
    JOIN account_bank_statement abs ON abl.statement_id = abs.id
    JOIN account_journal aj ON abs.journal_id = aj.id
    LEFT JOIN res_partner rp ON abl.partner_id = rp.id
    WHERE abs.state = 'open'
    ORDER BY abl.date DESC";

type SiiRow = (
    String,
    Option<NaiveDate>,
    Option<String>,
    Option<String>,
    Option<String>,
    f64,
);
type MoveRow = (
    String,
    Option<NaiveDate>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);
type StatementLineRow = (
    String,
    Option<NaiveDate>,
    Option<String>,
    Option<String>,
    Option<String>,
    f64,
    Option<String>,
);

#[derive(Clone)]
pub struct OdooSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub connect_timeout: Duration,
}

impl fmt::Debug for OdooSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OdooSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Reads pending work straight from a company's Odoo database. One
/// connection per fetch; each company lives in its own database.
#[derive(Debug, Clone)]
pub struct OdooAdapter {
    settings: OdooSettings,
}

impl OdooAdapter {
    pub fn new(settings: OdooSettings) -> Self {
        Self { settings }
    }

    async fn connect(&self, database: &str) -> Result<PgConnection, AdapterError> {
        let options = PgConnectOptions::new()
            .host(&self.settings.host)
            .port(self.settings.port)
            .username(&self.settings.user)
            .password(&self.settings.password)
            .database(database);

        tokio::time::timeout(
            self.settings.connect_timeout,
            PgConnection::connect_with(&options),
        )
        .await
        .map_err(|_| {
            AdapterError::Anyhow(anyhow!(
                "connecting to odoo database {database} timed out after {:?}",
                self.settings.connect_timeout
            ))
        })?
        .map_err(|source| AdapterError::Database {
            database: database.to_string(),
            source,
        })
    }

    async fn fetch_from(
        &self,
        company: &CompanyMapping,
        database: &str,
    ) -> Result<BacklogReport, AdapterError> {
        let mut conn = self.connect(database).await?;
        let result = self.read_backlog(&mut conn, database).await;
        if let Err(err) = conn.close().await {
            debug!(error = %err, "closing odoo connection");
        }
        let (document_acceptance, bookkeeping, reconciliation) =
            result.map_err(|source| AdapterError::Database {
                database: database.to_string(),
                source,
            })?;

        Ok(BacklogReport {
            company: company.name.clone(),
            source: Source::Odoo,
            queried_at: Utc::now(),
            document_acceptance,
            bookkeeping,
            reconciliation,
        })
    }

    async fn read_backlog(
        &self,
        conn: &mut PgConnection,
        database: &str,
    ) -> Result<(BacklogCategory, BacklogCategory, BacklogCategory), sqlx::Error> {
        let sii: Vec<SiiRow> = sqlx::query_as(SII_PENDING_SQL).fetch_all(&mut *conn).await?;
        let moves: Vec<MoveRow> = sqlx::query_as(DRAFT_MOVES_SQL)
            .fetch_all(&mut *conn)
            .await?;
        let lines: Vec<StatementLineRow> = sqlx::query_as(OPEN_STATEMENT_LINES_SQL)
            .fetch_all(&mut *conn)
            .await?;
        debug!(
            database,
            sii = sii.len(),
            moves = moves.len(),
            statement_lines = lines.len(),
            "odoo backlog rows"
        );

        let sii_items = sii
            .into_iter()
            .map(|(id, date, doc_type, folio, partner, amount)| BacklogItem {
                id,
                date,
                reference: folio,
                counterparty: partner,
                amount: Some(amount),
                note: doc_type,
            })
            .collect();
        let move_items = moves
            .into_iter()
            .map(|(id, date, journal, name, partner, reference)| BacklogItem {
                id,
                date,
                reference: name,
                counterparty: partner,
                amount: None,
                note: join_note(journal, reference),
            })
            .collect::<Vec<_>>();
        let line_items = lines
            .into_iter()
            .map(
                |(id, date, bank, description, partner, amount, reference)| BacklogItem {
                    id,
                    date,
                    reference,
                    counterparty: partner,
                    amount: Some(amount),
                    note: join_note(bank, description),
                },
            )
            .collect();

        // Draft moves carry no amount; their total is not meaningful.
        let bookkeeping = BacklogCategory {
            count: move_items.len() as u64,
            total: None,
            items: move_items,
        };
        Ok((
            BacklogCategory::from_items(sii_items),
            bookkeeping,
            BacklogCategory::from_items(line_items),
        ))
    }
}

fn join_note(head: Option<String>, tail: Option<String>) -> Option<String> {
    match (head, tail) {
        (Some(head), Some(tail)) if !tail.trim().is_empty() => Some(format!("{head}: {tail}")),
        (Some(head), _) => Some(head),
        (None, tail) => tail,
    }
}

#[async_trait]
impl SourceAdapter for OdooAdapter {
    fn source(&self) -> Source {
        Source::Odoo
    }

    async fn fetch_backlog(&self, company: &CompanyMapping) -> Result<BacklogReport, AdapterError> {
        let database = company.odoo_database().to_string();
        let span = info_span!("odoo_backlog", company = %company.alias, database = %database);
        self.fetch_from(company, &database).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notes_join_journal_and_detail() {
        assert_eq!(
            join_note(Some("Banco Chile".into()), Some("Transferencia".into())),
            Some("Banco Chile: Transferencia".into())
        );
        assert_eq!(
            join_note(Some("Compras".into()), Some("  ".into())),
            Some("Compras".into())
        );
        assert_eq!(join_note(None, Some("ref".into())), Some("ref".into()));
        assert_eq!(join_note(None, None), None);
    }

    #[test]
    fn settings_debug_hides_password() {
        let settings = OdooSettings {
            host: "odoo.internal".into(),
            port: 5432,
            user: "reader".into(),
            password: "hunter2".into(),
            connect_timeout: Duration::from_secs(10),
        };
        let rendered = format!("{settings:?}");
        assert!(rendered.contains("odoo.internal"));
        assert!(!rendered.contains("hunter2"));
    }
}
