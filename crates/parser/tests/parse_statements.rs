use insta::assert_debug_snapshot;
use parser::ast::{Expr, Ident, Literal};
use parser::{Statement, StatementReturnType, parse, parse_many};

#[test]
fn parse_select_one() {
    assert_debug_snapshot!(parse("select 1").unwrap(), @r###"
    [
        Select(
            SelectNode {
                projections: [
                    Expr(
                        Literal(
                            Number(
                                "1",
                            ),
                        ),
                    ),
                ],
                from: None,
                where_expr: None,
            },
        ),
    ]
    "###)
}

#[test]
fn parse_start_transaction_modes() {
    assert_debug_snapshot!(parse("start transaction isolation level snapshot, read only").unwrap(), @r###"
    [
        BeginTransaction(
            TransactionModes {
                isolation: Some(
                    Snapshot,
                ),
                read_only: Some(
                    true,
                ),
                priority: None,
            },
        ),
    ]
    "###)
}

#[test]
fn parse_transaction_block() {
    assert_debug_snapshot!(parse("begin; commit; rollback").unwrap(), @r###"
    [
        BeginTransaction(
            TransactionModes {
                isolation: None,
                read_only: None,
                priority: None,
            },
        ),
        Commit,
        Rollback,
    ]
    "###)
}

#[test]
fn parse_release_savepoint() {
    let stmts = parse("RELEASE SAVEPOINT my_savepoint; release other").unwrap();
    assert_eq!(
        vec![
            Statement::ReleaseSavepoint(Ident::from_string("my_savepoint")),
            Statement::ReleaseSavepoint(Ident::from_string("other")),
        ],
        stmts
    );
}

#[test]
fn parse_show_transaction_status() {
    assert_eq!(
        vec![Statement::ShowTransactionStatus],
        parse("show transaction status").unwrap()
    );
    parse("show transaction").unwrap_err();
}

#[test]
fn return_types() {
    // (sql, expected)
    let tests = [
        ("select 1", StatementReturnType::Rows),
        ("show transaction status", StatementReturnType::Rows),
        ("insert into kv values ('a', 1)", StatementReturnType::RowsAffected),
        ("delete from kv", StatementReturnType::RowsAffected),
        ("begin", StatementReturnType::Ack),
        ("commit", StatementReturnType::Ack),
        ("rollback", StatementReturnType::Ack),
        ("release savepoint s", StatementReturnType::Ack),
    ];

    for (sql, expected) in tests {
        let stmt = parse(sql).unwrap().remove(0);
        assert_eq!(expected, stmt.return_type(), "{sql}");
    }
}

#[test]
fn parse_many_normalizes_sql() {
    let stmts = parse_many("select 1 as a;insert into KV values ('k', -2);  begin read write").unwrap();
    let sqls: Vec<_> = stmts.iter().map(|s| s.sql.as_str()).collect();
    assert_eq!(
        vec![
            "SELECT 1 AS a",
            "INSERT INTO kv VALUES ('k', -2)",
            "BEGIN TRANSACTION READ WRITE",
        ],
        sqls
    );

    // Normalized text parses back into the same statement.
    for stmt in stmts {
        assert_eq!(vec![stmt.ast.clone()], parse(&stmt.sql).unwrap());
    }
}

#[test]
fn quoted_identifier_keeps_case() {
    let stmts = parse(r#"select "Value" from kv"#).unwrap();
    match &stmts[0] {
        Statement::Select(select) => {
            assert_eq!(
                parser::ast::SelectExpr::Expr(Expr::Ident(Ident::from_string("Value"))),
                select.projections[0]
            );
        }
        other => panic!("unexpected statement: {other:?}"),
    }
}

#[test]
fn string_escape_roundtrip() {
    let stmts = parse_many("select 'it''s'").unwrap();
    assert_eq!("SELECT 'it''s'", stmts[0].sql);
    match &stmts[0].ast {
        Statement::Select(select) => assert_eq!(
            parser::ast::SelectExpr::Expr(Expr::Literal(Literal::SingleQuotedString(
                "it's".to_string()
            ))),
            select.projections[0]
        ),
        other => panic!("unexpected statement: {other:?}"),
    }
}

#[test]
fn unknown_statement() {
    let err = parse("update kv set v = 1").unwrap_err();
    assert!(err.to_string().contains("Expected a keyword"), "{err}");
}
