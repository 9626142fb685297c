//! 混合搜索子模块
//!
//! ## 职责
//! - 空查询：全部非 Unknown 条目，置顶优先、新者优先
//! - 非空查询：全文索引（前缀通配、按相关度排名）与大小写不敏感的
//!   子串回退（通配符转义、排除已命中行）取并集，统一排序分页
//! - 高级搜索：在混合匹配之上叠加类型集/颜色集过滤
//!
//! ## 排序约定
//! 置顶 DESC → 全文命中先于子串命中 → 相关度升序（越小越相关）→ 修改时间 DESC
//!
//! ## 过滤策略（刻意保留的 UX 不对称）
//! 只要有任一过滤条件生效（非空查询、非空类型集、非空颜色集），
//! `is_pinned` 限定即被忽略，搜索跨越整库；仅当没有其他条件时才生效。

use rusqlite::types::Value;

use crate::error::AppError;
use crate::model::{CardColor, ClipboardEntry, EntryType};

use super::{entry_from_row, ClipboardStore, ENTRY_COLUMNS};

/// 高级搜索的可选过滤条件
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub types: Vec<EntryType>,
    pub colors: Vec<CardColor>,
    pub is_pinned: Option<bool>,
}

impl ClipboardStore {
    /// 混合搜索：空查询等价于全量列表（置顶优先、新者优先）
    pub fn search(
        &self,
        query: &str,
        limit: i64,
        skip: i64,
    ) -> Result<Vec<ClipboardEntry>, AppError> {
        self.search_advanced(query, &SearchFilter::default(), limit, skip)
    }

    /// 混合搜索 + 类型/颜色/置顶过滤
    pub fn search_advanced(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: i64,
        skip: i64,
    ) -> Result<Vec<ClipboardEntry>, AppError> {
        let query = query.trim();
        let other_filter_active =
            !query.is_empty() || !filter.types.is_empty() || !filter.colors.is_empty();
        // 任一条件生效时忽略置顶限定（跨越置顶/非置顶分页）
        let pinned_scope = if other_filter_active { None } else { filter.is_pinned };

        if query.is_empty() {
            self.list_filtered(filter, pinned_scope, limit, skip)
        } else {
            self.hybrid_search(query, filter, limit, skip)
        }
    }

    fn list_filtered(
        &self,
        filter: &SearchFilter,
        pinned_scope: Option<bool>,
        limit: i64,
        skip: i64,
    ) -> Result<Vec<ClipboardEntry>, AppError> {
        let mut params: Vec<Value> = Vec::new();
        let mut clause = String::new();
        push_filter_clauses(&mut clause, &mut params, filter, "");
        if let Some(pinned) = pinned_scope {
            clause.push_str(" AND is_pinned = ?");
            params.push(Value::Integer(pinned as i64));
        }

        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE entry_type <> 'unknown'{clause}
             ORDER BY is_pinned DESC, modified_at DESC
             LIMIT ? OFFSET ?"
        );
        params.push(Value::Integer(limit));
        params.push(Value::Integer(skip));

        self.run_entry_query(&sql, params)
    }

    fn hybrid_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: i64,
        skip: i64,
    ) -> Result<Vec<ClipboardEntry>, AppError> {
        let cols = qualified_columns("e");
        let match_expr = fts_match_expr(query);
        let like_pattern = format!("%{}%", escape_like(query));

        let mut params: Vec<Value> = Vec::new();
        let mut fts_clause = String::new();
        let mut like_clause = String::new();

        // 参数按出现顺序绑定：MATCH → 全文分支过滤 → LIKE×3 → 子串分支过滤 → 分页
        params.push(Value::Text(match_expr));
        push_filter_clauses(&mut fts_clause, &mut params, filter, "e.");

        params.push(Value::Text(like_pattern.clone()));
        params.push(Value::Text(like_pattern.clone()));
        params.push(Value::Text(like_pattern));
        push_filter_clauses(&mut like_clause, &mut params, filter, "e.");

        params.push(Value::Integer(limit));
        params.push(Value::Integer(skip));

        let sql = format!(
            "WITH fts_hits AS (
                 SELECT rowid, rank FROM entries_fts WHERE entries_fts MATCH ?
             )
             SELECT {cols}, 0 AS tier, f.rank AS relevance
               FROM entries e JOIN fts_hits f ON f.rowid = e.rowid
              WHERE e.entry_type <> 'unknown'{fts_clause}
             UNION ALL
             SELECT {cols}, 1 AS tier, 0.0 AS relevance
               FROM entries e
              WHERE e.entry_type <> 'unknown'
                AND e.rowid NOT IN (SELECT rowid FROM fts_hits)
                AND (e.content LIKE ? ESCAPE '\\'
                     OR COALESCE(e.app_source, '') LIKE ? ESCAPE '\\'
                     OR COALESCE(e.label, '') LIKE ? ESCAPE '\\'){like_clause}
             ORDER BY is_pinned DESC, tier ASC, relevance ASC, modified_at DESC
             LIMIT ? OFFSET ?"
        );

        self.run_entry_query(&sql, params)
    }

    fn run_entry_query(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<ClipboardEntry>, AppError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Database(format!("准备搜索查询失败: {}", e)))?;
        let items = stmt
            .query_map(rusqlite::params_from_iter(params), entry_from_row)
            .map_err(|e| AppError::Database(format!("执行搜索失败: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("读取搜索结果失败: {}", e)))?;
        Ok(items)
    }
}

/// 生成类型集/颜色集的 IN 过滤片段并追加对应参数
fn push_filter_clauses(
    clause: &mut String,
    params: &mut Vec<Value>,
    filter: &SearchFilter,
    prefix: &str,
) {
    if !filter.types.is_empty() {
        let placeholders = vec!["?"; filter.types.len()].join(", ");
        clause.push_str(&format!(" AND {prefix}entry_type IN ({placeholders})"));
        for t in &filter.types {
            params.push(Value::Text(t.as_str().to_string()));
        }
    }
    if !filter.colors.is_empty() {
        let placeholders = vec!["?"; filter.colors.len()].join(", ");
        clause.push_str(&format!(
            " AND COALESCE({prefix}card_color, 'none') IN ({placeholders})"
        ));
        for c in &filter.colors {
            params.push(Value::Text(c.as_str().to_string()));
        }
    }
}

fn qualified_columns(alias: &str) -> String {
    ENTRY_COLUMNS
        .split(", ")
        .map(|col| format!("{alias}.{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 把查询转为 FTS5 前缀匹配表达式：每个词条加引号并追加 `*`
fn fts_match_expr(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"*", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 转义 LIKE 通配符，使查询自身的 `%` `_` `\` 按字面量匹配
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{escape_like, fts_match_expr, SearchFilter};
    use crate::db::test_support::open_temp_store;
    use crate::model::{CardColor, ClipboardEntry, EntryType};

    fn save(
        store: &crate::db::ClipboardStore,
        content: &str,
        entry_type: EntryType,
        modified: i64,
    ) -> ClipboardEntry {
        let mut e = ClipboardEntry::new(content, entry_type);
        e.modified_at = modified;
        store.save(&mut e).expect("save entry");
        e
    }

    #[test]
    fn blank_query_lists_all_pinned_first_then_newest() {
        let (_dir, store) = open_temp_store();
        save(&store, "older", EntryType::Text, 10);
        save(&store, "newer", EntryType::Text, 20);
        let mut pinned = ClipboardEntry::new("pinned", EntryType::Text);
        pinned.modified_at = 5;
        pinned.is_pinned = true;
        store.save(&mut pinned).expect("save pinned");
        save(&store, "ghost", EntryType::Unknown, 99);

        let results = store.search("", 100, 0).expect("blank search");
        let contents: Vec<&str> = results.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["pinned", "newer", "older"]);
    }

    #[test]
    fn fts_hits_rank_before_substring_hits_without_duplicates() {
        let (_dir, store) = open_temp_store();
        let fts_hit = save(&store, "beta release notes", EntryType::Text, 10);
        let substring_hit = save(&store, "xbetay", EntryType::Text, 20);
        save(&store, "unrelated", EntryType::Text, 30);

        let results = store.search("beta", 100, 0).expect("hybrid search");
        let ids: Vec<&str> = results.iter().map(|e| e.id.as_str()).collect();

        assert_eq!(ids, vec![fts_hit.id.as_str(), substring_hit.id.as_str()]);
    }

    #[test]
    fn pinned_substring_hit_sorts_before_unpinned_fts_hit() {
        let (_dir, store) = open_temp_store();
        save(&store, "beta release", EntryType::Text, 50);
        let mut pinned = ClipboardEntry::new("xbetay", EntryType::Text);
        pinned.is_pinned = true;
        pinned.modified_at = 1;
        store.save(&mut pinned).expect("save pinned");

        let results = store.search("beta", 100, 0).expect("search");
        assert_eq!(results[0].id, pinned.id, "pin outranks match tier");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn search_covers_app_source_and_label() {
        let (_dir, store) = open_temp_store();
        let mut by_source = ClipboardEntry::new("aaa", EntryType::Text);
        by_source.app_source = Some("Firefox".to_string());
        store.save(&mut by_source).expect("save by_source");

        let mut by_label = ClipboardEntry::new("bbb", EntryType::Text);
        by_label.label = Some("invoice".to_string());
        store.save(&mut by_label).expect("save by_label");

        let results = store.search("firefox", 100, 0).expect("source search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, by_source.id);

        let results = store.search("invoice", 100, 0).expect("label search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, by_label.id);
    }

    #[test]
    fn wildcards_in_query_match_literally() {
        let (_dir, store) = open_temp_store();
        // 查询 "0%"：全文前缀 "0"* 两条都不命中，只有子串回退按字面量匹配
        let literal = save(&store, "100%", EntryType::Text, 10);
        save(&store, "100x", EntryType::Text, 20);

        let results = store.search("0%", 100, 0).expect("wildcard search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, literal.id);
    }

    #[test]
    fn limit_and_skip_apply_to_the_merged_result() {
        let (_dir, store) = open_temp_store();
        for i in 0..5 {
            save(&store, &format!("note {i}"), EntryType::Text, i);
        }

        let page = store.search("note", 2, 1).expect("paged search");
        assert_eq!(page.len(), 2);
        let contents: Vec<&str> = page.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["note 3", "note 2"]);
    }

    #[test]
    fn advanced_filters_by_type_and_color() {
        let (_dir, store) = open_temp_store();
        save(&store, "a link", EntryType::Link, 10);
        save(&store, "a text", EntryType::Text, 20);
        let mut colored = ClipboardEntry::new("a colored", EntryType::Text);
        colored.card_color = CardColor::Red;
        colored.modified_at = 30;
        store.save(&mut colored).expect("save colored");

        let filter = SearchFilter {
            types: vec![EntryType::Link],
            ..Default::default()
        };
        let results = store.search_advanced("", &filter, 100, 0).expect("type filter");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "a link");

        let filter = SearchFilter {
            colors: vec![CardColor::Red],
            ..Default::default()
        };
        let results = store.search_advanced("a", &filter, 100, 0).expect("color filter");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, colored.id);
    }

    #[test]
    fn pinned_scope_ignored_when_any_other_filter_is_active() {
        let (_dir, store) = open_temp_store();
        let mut pinned = ClipboardEntry::new("alpha pinned", EntryType::Text);
        pinned.is_pinned = true;
        store.save(&mut pinned).expect("save pinned");
        let mut loose = ClipboardEntry::new("alpha loose", EntryType::Text);
        store.save(&mut loose).expect("save loose");

        // 只有置顶限定时生效
        let filter = SearchFilter { is_pinned: Some(true), ..Default::default() };
        let results = store.search_advanced("", &filter, 100, 0).expect("pinned only");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, pinned.id);

        // 查询词生效后限定被忽略，跨越整库
        let results = store.search_advanced("alpha", &filter, 100, 0).expect("query + pinned");
        assert_eq!(results.len(), 2);

        // 类型集同理
        let filter = SearchFilter {
            types: vec![EntryType::Text],
            is_pinned: Some(true),
            ..Default::default()
        };
        let results = store.search_advanced("", &filter, 100, 0).expect("types + pinned");
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn fts_match_expr_quotes_and_prefixes_tokens() {
        assert_eq!(fts_match_expr("hello world"), "\"hello\"* \"world\"*");
        assert_eq!(fts_match_expr("say \"hi\""), "\"say\"* \"\"\"hi\"\"\"*");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// 任意查询经转义后按字面量匹配自身，且通配符不再生效
        #[test]
        fn escaped_like_matches_literally(raw in "[a-z%_\\\\]{1,12}") {
            let conn = rusqlite::Connection::open_in_memory().expect("open memory db");
            conn.execute("CREATE TABLE t (v TEXT)", []).expect("create table");
            conn.execute("INSERT INTO t (v) VALUES (?1)", [&raw]).expect("insert value");

            let pattern = format!("%{}%", escape_like(&raw));
            let hits: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM t WHERE v LIKE ?1 ESCAPE '\\'",
                    [&pattern],
                    |row| row.get(0),
                )
                .expect("literal self match");
            prop_assert_eq!(hits, 1);

            if raw.contains('%') {
                let decoy = raw.replace('%', "x");
                conn.execute("DELETE FROM t", []).expect("clear table");
                conn.execute("INSERT INTO t (v) VALUES (?1)", [&decoy]).expect("insert decoy");
                let hits: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM t WHERE v LIKE ?1 ESCAPE '\\'",
                        [&pattern],
                        |row| row.get(0),
                    )
                    .expect("decoy should not match");
                prop_assert_eq!(hits, 0);
            }
        }
    }
}
