#![forbid(unsafe_code)]

mod cells;
mod coordination;
mod core;
mod events;
mod indexes;
mod pragmas;

pub(super) fn full_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(pragmas::SQL);
    sql.push_str(core::SQL);
    sql.push_str(events::SQL);
    sql.push_str(cells::SQL);
    sql.push_str(coordination::SQL);
    sql.push_str(indexes::SQL);
    sql
}
