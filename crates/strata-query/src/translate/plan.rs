//! Incremental construction of a single SELECT.
//!
//! A [`SelectPlan`] starts from one table and absorbs filters, a projection,
//! ordering, paging and at most one join. Lambdas are resolved against the
//! plan's current sources: the join sides, or the projection once one is set.

use super::{unsupported, SourceBinding, Translator};
use crate::error::TranslateResult;
use crate::model::TableModel;
use crate::quote::{Lambda, Quoted};
use crate::sql::{
    BinaryOperator, Expr, Ident, JoinClause, JoinOperator, OrderingTerm, ResultColumn,
    SelectCore, SelectStatement, SortDirection, TableSource, UpdateStatement,
};
use crate::tree::ImmutableList;
use std::fmt;
use std::slice;
use std::sync::Arc;

/// Alias of the derived table a paged count wraps
const COUNTED_ALIAS: &str = "counted";

/// How a join matches rows
#[derive(Debug, Clone, Copy)]
pub enum JoinOn<'l> {
    /// `(left, right) => condition`
    Predicate(&'l Lambda),
    /// `outer(left) == inner(right)`
    Keys {
        outer: &'l Lambda,
        inner: &'l Lambda,
    },
}

#[derive(Debug, Clone)]
pub struct SelectPlan {
    core: SelectCore,
    sources: Vec<SourceBinding>,
    projection: Option<SourceBinding>,
    ordering: Vec<OrderingTerm>,
    limit: Option<u64>,
    offset: u64,
}

fn literal(n: u64) -> Expr {
    Expr::LiteralInt(i64::try_from(n).unwrap_or(i64::MAX))
}

impl SelectPlan {
    /// Select every column of `model`, qualified by `alias`
    pub fn table(model: Arc<TableModel>, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        let source = TableSource::Table {
            name: Ident::new(model.name.clone()),
            schema: model.schema.clone().map(Ident::new),
            alias: (alias != model.name).then(|| Ident::new(alias.clone())),
        };
        Self {
            core: SelectCore::from_source(source),
            sources: vec![SourceBinding::table(alias, model)],
            projection: None,
            ordering: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    /// Aliases of the tables this plan reads
    pub fn aliases(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter_map(|s| match s {
                SourceBinding::Table { alias, .. } => Some(alias.clone()),
                _ => None,
            })
            .collect()
    }

    /// Model of the first table this plan reads
    pub fn root_model(&self) -> Option<Arc<TableModel>> {
        self.sources.iter().find_map(|s| match s {
            SourceBinding::Table { model, .. } => Some(Arc::clone(model)),
            _ => None,
        })
    }

    /// Bindings lambdas over this plan are resolved against
    pub fn sources(&self) -> &[SourceBinding] {
        match &self.projection {
            Some(projection) => slice::from_ref(projection),
            None => &self.sources,
        }
    }

    pub fn is_paged(&self) -> bool {
        self.limit.is_some() || self.offset > 0
    }

    pub fn is_projected(&self) -> bool {
        self.projection.is_some()
    }

    pub fn is_sorted(&self) -> bool {
        !self.ordering.is_empty()
    }

    pub fn is_joined(&self) -> bool {
        self.core.join_clause.is_some()
    }

    /// True while the plan is still a bare table read
    pub fn is_plain(&self) -> bool {
        self.core.where_clause.is_none()
            && !self.is_paged()
            && !self.is_projected()
            && !self.is_sorted()
            && !self.is_joined()
    }

    /// AND a predicate into the WHERE clause
    pub fn filter(
        &mut self,
        tr: &Translator<'_>,
        predicate: &Lambda,
        node: impl fmt::Display,
    ) -> TranslateResult<()> {
        if self.is_paged() {
            return Err(unsupported("filter after paging", node));
        }
        let expr = tr.predicate(predicate, self.sources())?;
        self.core = std::mem::take(&mut self.core).with_where(expr);
        Ok(())
    }

    pub fn project(
        &mut self,
        tr: &Translator<'_>,
        projection: &Lambda,
        node: impl fmt::Display,
    ) -> TranslateResult<()> {
        if self.is_projected() {
            return Err(unsupported("projection of a projection", node));
        }
        let binding = tr.projection(projection, self.sources())?;
        self.projection = Some(binding);
        Ok(())
    }

    /// Add an ordering term. A primary term replaces any existing ordering;
    /// a secondary one requires a primary term before it.
    pub fn order(
        &mut self,
        tr: &Translator<'_>,
        key: &Lambda,
        direction: SortDirection,
        primary: bool,
        node: impl fmt::Display,
    ) -> TranslateResult<()> {
        if self.is_paged() {
            return Err(unsupported("ordering after paging", node));
        }
        if !primary && self.ordering.is_empty() {
            return Err(unsupported("secondary ordering without a primary one", node));
        }
        let expr = tr.key(key, self.sources())?;
        if primary {
            self.ordering.clear();
        }
        self.ordering.push(OrderingTerm { expr, direction });
        Ok(())
    }

    /// Narrow each row to its member `name`, aliased by that name
    pub fn select_member(
        &mut self,
        tr: &Translator<'_>,
        owner: &Quoted,
        name: &str,
    ) -> TranslateResult<()> {
        let rows = match self.sources() {
            [single] => single.clone(),
            sides => SourceBinding::composite_of(sides),
        };
        let member = tr.member(&rows, owner, name, owner)?.into_binding();
        self.projection = Some(SourceBinding::Composite(vec![(name.to_string(), member)]));
        Ok(())
    }

    /// Skip `count` rows of the current result
    pub fn skip(&mut self, count: u64) {
        self.limit = self.limit.map(|limit| limit.saturating_sub(count));
        self.offset = self.offset.saturating_add(count);
    }

    /// Keep at most `count` rows of the current result
    pub fn take(&mut self, count: u64) {
        self.limit = Some(self.limit.map_or(count, |limit| limit.min(count)));
    }

    /// Inner-join `right` onto this plan.
    ///
    /// Both sides must be unprojected, unsorted and unpaged, and this plan
    /// must not already be joined. A filtered right side becomes a derived
    /// table under its alias.
    pub fn join(
        &mut self,
        tr: &Translator<'_>,
        right: SelectPlan,
        on: JoinOn<'_>,
        node: impl fmt::Display,
    ) -> TranslateResult<()> {
        let shaped = |p: &SelectPlan| p.is_paged() || p.is_projected() || p.is_sorted();
        if self.is_joined() || right.is_joined() || shaped(self) || shaped(&right) {
            return Err(unsupported(
                "join over a joined, paged, projected or sorted source",
                node,
            ));
        }
        let (Some(left_binding), Some(right_binding)) =
            (self.sources.first().cloned(), right.sources.first().cloned())
        else {
            return Err(unsupported("join without a source", node));
        };
        let Some(left_source) = self.core.table_sources.first().cloned() else {
            return Err(unsupported("join without a source", node));
        };

        let constraint = match on {
            JoinOn::Predicate(predicate) => {
                tr.predicate(predicate, &[left_binding, right_binding.clone()])?
            }
            JoinOn::Keys { outer, inner } => Expr::binary(
                tr.key(outer, slice::from_ref(&left_binding))?,
                BinaryOperator::Eq,
                tr.key(inner, slice::from_ref(&right_binding))?,
            ),
        };

        let right_alias = right.aliases().into_iter().next().unwrap_or_default();
        let right_source = right.into_source(right_alias);
        let clause = JoinClause::new(left_source).join(
            JoinOperator::Inner,
            right_source,
            Some(constraint),
        );

        let core = std::mem::take(&mut self.core);
        self.core = SelectCore {
            table_sources: ImmutableList::new(),
            join_clause: Some(clause),
            ..core
        };
        self.sources.push(right_binding);
        Ok(())
    }

    /// Turn a filtered single-table plan into an UPDATE
    pub fn into_update(
        self,
        tr: &Translator<'_>,
        setter: &Lambda,
        node: impl fmt::Display,
    ) -> TranslateResult<UpdateStatement> {
        if self.is_joined() || self.is_paged() || self.is_projected() || self.is_sorted() {
            return Err(unsupported(
                "update of a joined, paged, projected or sorted source",
                node,
            ));
        }
        let Some(target @ SourceBinding::Table { model, .. }) = self.sources.first() else {
            return Err(unsupported("update of a computed source", node));
        };
        let assignments = tr.assignments(setter, target)?;
        Ok(UpdateStatement {
            table: Ident::new(model.name.clone()),
            schema: model.schema.clone().map(Ident::new),
            assignments: assignments.into(),
            where_clause: self.core.where_clause,
        })
    }

    fn result_columns(&self) -> Vec<ResultColumn> {
        match (&self.projection, self.sources.as_slice()) {
            (Some(projection), _) => projection.columns(),
            (None, [single]) => single.columns(),
            (None, sides) => SourceBinding::composite_of(sides).columns(),
        }
    }

    /// The finished SELECT
    pub fn finish(self) -> SelectStatement {
        let columns = self.result_columns();
        let mut stmt = SelectStatement::from_core(self.core.with_columns(columns.into()));
        for term in self.ordering {
            stmt = stmt.with_ordering(term);
        }
        if let Some(limit) = self.limit {
            stmt = stmt.with_limit(literal(limit));
        }
        if self.offset > 0 {
            stmt = stmt.with_offset(literal(self.offset));
        }
        stmt
    }

    /// `SELECT COUNT(*)` over the rows this plan reads.
    ///
    /// Projection and ordering do not change the row count and are dropped;
    /// paging does, so a paged plan is counted as a derived table.
    pub fn count(self) -> SelectStatement {
        let count_column = ImmutableList::from(vec![ResultColumn::expr(Expr::CountAll)]);
        if self.is_paged() {
            let inner = self.finish();
            return SelectStatement::from_core(SelectCore {
                result_columns: count_column,
                table_sources: ImmutableList::from(vec![TableSource::Subquery {
                    query: Box::new(inner),
                    alias: Some(Ident::new(COUNTED_ALIAS)),
                }]),
                ..Default::default()
            });
        }
        SelectStatement::from_core(self.core.with_columns(count_column))
    }

    /// This plan as a FROM item: the table itself while the plan is plain,
    /// otherwise a derived table under `alias`
    pub fn into_source(self, alias: impl Into<String>) -> TableSource {
        if self.is_plain() {
            if let Some(source) = self.core.table_sources.first() {
                return source.clone();
            }
        }
        TableSource::Subquery {
            query: Box::new(self.finish()),
            alias: Some(Ident::new(alias.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::{lambda, object, param};
    use crate::value::ValueType;

    fn users() -> Arc<TableModel> {
        Arc::new(
            TableModel::new("User")
                .column("Id", ValueType::Integer)
                .column("Name", ValueType::Text),
        )
    }

    fn orders() -> Arc<TableModel> {
        Arc::new(
            TableModel::new("Order")
                .column("Id", ValueType::Integer)
                .column("UserId", ValueType::Integer),
        )
    }

    fn by_id() -> Lambda {
        lambda(["u"], param("u").member("Id"))
    }

    #[test]
    fn test_plain_table_selects_every_column() {
        let stmt = SelectPlan::table(users(), "User").finish();
        let core = stmt.single_core().unwrap();

        assert_eq!(core.result_columns.len(), 2);
        assert_eq!(core.table_sources[0], TableSource::table("User"));
        assert!(!stmt.is_paged());
    }

    #[test]
    fn test_paging_arithmetic() {
        let mut plan = SelectPlan::table(users(), "User");
        plan.skip(2);
        plan.take(10);
        plan.take(20);
        plan.skip(15);
        let stmt = plan.finish();

        assert_eq!(stmt.limit, Some(Expr::LiteralInt(0)));
        assert_eq!(stmt.offset, Some(Expr::LiteralInt(17)));
    }

    #[test]
    fn test_primary_sort_replaces_ordering() {
        let tr = Translator::new();
        let mut plan = SelectPlan::table(users(), "User");
        plan.order(&tr, &by_id(), SortDirection::Ascending, true, "t").unwrap();
        let key = lambda(["u"], param("u").member("Name"));
        plan.order(&tr, &key, SortDirection::Descending, false, "t")
            .unwrap();
        plan.order(&tr, &by_id(), SortDirection::Descending, true, "t").unwrap();

        let stmt = plan.finish();
        assert_eq!(stmt.ordering_terms.len(), 1);
        assert_eq!(stmt.ordering_terms[0].direction, SortDirection::Descending);
    }

    #[test]
    fn test_secondary_sort_needs_primary() {
        let mut plan = SelectPlan::table(users(), "User");
        assert!(plan
            .order(&Translator::new(), &by_id(), SortDirection::Ascending, false, "t")
            .is_err());
    }

    #[test]
    fn test_filter_after_paging_is_rejected() {
        let mut plan = SelectPlan::table(users(), "User");
        plan.take(1);
        let pred = lambda(["u"], param("u").member("Id").gt(1));

        assert!(plan.filter(&Translator::new(), &pred, "t").is_err());
    }

    #[test]
    fn test_filtered_right_side_becomes_derived_table() {
        let tr = Translator::new();
        let mut left = SelectPlan::table(users(), "User");
        let mut right = SelectPlan::table(orders(), "Order");
        right
            .filter(&tr, &lambda(["o"], param("o").member("Id").gt(10)), "t")
            .unwrap();

        let on = lambda(
            ["u", "o"],
            param("u").member("Id").equals(param("o").member("UserId")),
        );
        left.join(&tr, right, JoinOn::Predicate(&on), "t").unwrap();
        let stmt = left.finish();
        let core = stmt.single_core().unwrap();

        assert!(core.table_sources.is_empty());
        let joined = &core.join_clause.as_ref().unwrap().joins[0];
        assert!(matches!(
            &joined.source,
            TableSource::Subquery { alias: Some(a), .. } if a.as_str() == "Order"
        ));
        // Unprojected join selects both sides, aliased by side
        assert_eq!(core.result_columns.len(), 4);
    }

    #[test]
    fn test_count_of_paged_plan_wraps_subquery() {
        let mut plan = SelectPlan::table(users(), "User");
        plan.take(5);
        let stmt = plan.count();
        let core = stmt.single_core().unwrap();

        assert_eq!(core.result_columns[0], ResultColumn::expr(Expr::CountAll));
        assert!(matches!(core.table_sources[0], TableSource::Subquery { .. }));
    }

    #[test]
    fn test_count_drops_projection_and_ordering() {
        let tr = Translator::new();
        let mut plan = SelectPlan::table(users(), "User");
        plan.order(&tr, &by_id(), SortDirection::Ascending, true, "t").unwrap();
        plan.project(&tr, &lambda(["u"], object([("N", param("u").member("Name"))])), "t")
            .unwrap();
        let stmt = plan.count();

        assert!(stmt.ordering_terms.is_empty());
        assert_eq!(
            stmt.single_core().unwrap().result_columns.as_slice(),
            &[ResultColumn::expr(Expr::CountAll)]
        );
    }

    #[test]
    fn test_update_requires_plain_filtered_table() {
        let tr = Translator::new();
        let setter = lambda(["u"], object([("Name", param("u").member("Name"))]));

        let update = SelectPlan::table(users(), "User")
            .into_update(&tr, &setter, "t")
            .unwrap();
        assert_eq!(update.table, Ident::new("User"));
        assert!(update.where_clause.is_none());

        let mut paged = SelectPlan::table(users(), "User");
        paged.take(1);
        assert!(paged.into_update(&tr, &setter, "t").is_err());
    }
}
