//! Client persistence and the lexical fuzzy-match ranking.
//!
//! Ranking works on a normalized full-text string per client (lower-cased,
//! space-joined name, email, and description) scored against the query with
//! a word-level similarity that tolerates reordering and typos. A hit is
//! classified *exact* when the full text contains the query as a substring
//! or the similarity is effectively 1.0; everything else above the
//! threshold is a *suggestion*.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::row_uuid;
use crate::models::{now_ts, Client, ClientSearchResponse, ClientSearchResult};

/// Result volume/precision trade-off when the caller leaves it unset.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.4;
pub const DEFAULT_LIMIT: usize = 50;

fn client_from_row(row: &SqliteRow) -> Result<Client> {
    let links_json: String = row.get("social_links");
    let social_links: Vec<String> = serde_json::from_str(&links_json)?;

    Ok(Client {
        id: row_uuid(row, "id")?,
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        description: row.get("description"),
        social_links,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub async fn insert(
    pool: &SqlitePool,
    first_name: &str,
    last_name: &str,
    email: &str,
    description: Option<&str>,
    social_links: &[String],
) -> Result<Client> {
    let id = Uuid::new_v4();
    let now = now_ts();
    let links_json = serde_json::to_string(social_links)?;

    sqlx::query(
        r#"
        INSERT INTO clients (id, first_name, last_name, email, description, social_links, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(description)
    .bind(&links_json)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Client {
        id,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: email.to_string(),
        description: description.map(str::to_string),
        social_links: social_links.to_vec(),
        created_at: now,
        updated_at: now,
    })
}

pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Option<Client>> {
    let row = sqlx::query("SELECT * FROM clients WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| client_from_row(&r)).transpose()
}

/// Fuzzy search over clients. Blank queries return two empty lists.
pub async fn search(
    pool: &SqlitePool,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f64>,
) -> Result<ClientSearchResponse> {
    let clean = query.trim().to_lowercase();
    if clean.is_empty() {
        return Ok(ClientSearchResponse::default());
    }

    let threshold = threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
    let limit = limit.unwrap_or(DEFAULT_LIMIT);

    let rows = sqlx::query("SELECT * FROM clients")
        .fetch_all(pool)
        .await?;

    struct Scored {
        client: Client,
        score: f64,
        is_exact: bool,
    }

    let mut scored: Vec<Scored> = Vec::new();
    for row in &rows {
        let client = client_from_row(row)?;
        let full_text = full_text(&client);
        let contains = full_text.contains(&clean);
        let score = word_similarity(&clean, &full_text);

        if !contains && score < threshold {
            continue;
        }

        scored.push(Scored {
            client,
            score,
            is_exact: contains || score >= 1.0 - f64::EPSILON,
        });
    }

    // Exact rows first, then by descending score; id breaks ties for
    // deterministic output.
    scored.sort_by(|a, b| {
        b.is_exact
            .cmp(&a.is_exact)
            .then(
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.client.id.cmp(&b.client.id))
    });
    scored.truncate(limit);

    let mut response = ClientSearchResponse::default();
    for item in scored {
        let result = ClientSearchResult {
            client: item.client,
            score: item.score,
        };
        if item.is_exact {
            response.matches.push(result);
        } else {
            response.suggestions.push(result);
        }
    }

    Ok(response)
}

/// Normalized haystack for one client.
fn full_text(client: &Client) -> String {
    let mut parts = vec![
        client.first_name.as_str(),
        client.last_name.as_str(),
        client.email.as_str(),
    ];
    if let Some(description) = client.description.as_deref() {
        parts.push(description);
    }
    parts.join(" ").to_lowercase()
}

/// Word-level similarity of `query` against `text`, both already
/// lower-cased. Each query word is matched against its best-scoring text
/// word (Sørensen–Dice over character bigrams, typo tolerant); the result
/// is the mean over query words, so word order does not matter.
pub fn word_similarity(query: &str, text: &str) -> f64 {
    let query_words: Vec<&str> = query.split_whitespace().collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let text_words: Vec<&str> = text.split_whitespace().collect();
    if text_words.is_empty() {
        return 0.0;
    }

    let total: f64 = query_words
        .iter()
        .map(|qw| {
            text_words
                .iter()
                .map(|tw| strsim::sorensen_dice(qw, tw))
                .fold(0.0f64, f64::max)
        })
        .sum();

    total / query_words.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_similarity_exact_phrase() {
        let score = word_similarity("aleksandr konopko", "aleksandr konopko a.k@example.com");
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_word_similarity_reordered_words() {
        let score = word_similarity("konopko aleksandr", "aleksandr konopko");
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_word_similarity_typo_scores_below_one() {
        let score = word_similarity("aleksanr", "aleksandr konopko");
        assert!(score > 0.5, "typo should still score well: {}", score);
        assert!(score < 1.0 - f64::EPSILON);
    }

    #[test]
    fn test_word_similarity_unrelated_is_low() {
        let score = word_similarity("zebra", "aleksandr konopko");
        assert!(score < 0.3, "unrelated query scored {}", score);
    }

    #[test]
    fn test_word_similarity_empty_inputs() {
        assert_eq!(word_similarity("", "text"), 0.0);
        assert_eq!(word_similarity("query", ""), 0.0);
    }
}
