use crate::domain::UserId;

/// Whether `user_id` is an operator allowed to trigger broadcasts.
///
/// An empty allow-list authorizes nobody.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if allowed_users.is_empty() {
        return false;
    }
    allowed_users.contains(&user_id.0)
}
