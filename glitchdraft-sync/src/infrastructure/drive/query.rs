//! Drive 搜索表达式构造

use crate::domain::model::{FOLDER_MIME_TYPE, NameFilter};

/// 列表接口只请求必要字段
pub const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,modifiedTime,parents)";
pub const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime,parents,trashed";

/// 转义字符串字面量中的 `\` 与 `'`
pub fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn folder_query(name: &str) -> String {
    format!(
        "name='{}' and mimeType='{}' and trashed=false",
        escape(name),
        FOLDER_MIME_TYPE
    )
}

pub fn files_query(folder_id: &str, filter: &NameFilter) -> String {
    let name_clause = match filter {
        NameFilter::Exact(name) => format!("name='{}'", escape(name)),
        // `contains` 按词前缀匹配，结果还需在本地按前缀过滤
        NameFilter::Prefix(prefix) => format!("name contains '{}'", escape(prefix)),
    };
    format!(
        "'{}' in parents and {} and trashed=false",
        escape(folder_id),
        name_clause
    )
}

pub fn matches(filter: &NameFilter, name: &str) -> bool {
    match filter {
        NameFilter::Exact(expected) => name == expected,
        NameFilter::Prefix(prefix) => name.starts_with(prefix.as_str()),
    }
}
