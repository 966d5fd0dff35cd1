use crate::ResultSender;

use super::Status;

#[derive(Debug)]
pub enum Query {
    Status(ResultSender<Status>),
}
