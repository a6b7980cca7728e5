use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::dispatch::collection::{OwnedChange, TicketCollection};
use crate::dispatch::CommandDispatcher;
use crate::error::CommandExecuteError;
use crate::messaging::message::{AuthCredentials, ErrorDetail, ErrorKind, Request, RequestBody, Response};
use crate::model::ticket::{Coordinates, Ticket, TicketKind};


pub const EMPTY_COLLECTION_MESSAGE: &str = "Коллекция пуста.";
pub const COLLECTION_ELEMENTS_MESSAGE: &str = "ЭЛЕМЕНТЫ КОЛЛЕКЦИИ:";

const NO_ARGS: &str = "Команда не принимает аргументы.";
const ONE_ARG: &str = "Команда принимает один обязательный аргумент.";

/// A single named command. Commands are stateless apart from their handle to the collection.
pub trait Command: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    fn execute(&self, request: &Request) -> Response;
    fn package_body(&self, args: &[String]) -> Result<RequestBody, CommandExecuteError>;
}

fn no_args(args: &[String]) -> Result<RequestBody, CommandExecuteError> {
    if !args.is_empty() {
        return Err(CommandExecuteError::WrongArguments(NO_ARGS.to_string()));
    }
    Ok(RequestBody::empty())
}

/// credentials of the caller, or the error response for commands that are reserved to logged-in users
fn require_auth(request: &Request) -> Result<&AuthCredentials, Response> {
    request.auth()
        .ok_or_else(|| Response::error(request.request_id(), ErrorDetail::new(
            ErrorKind::Authentication,
            format!("Команда {} доступна только авторизованным пользователям.", request.command_name()),
        )))
}

fn wrong_argument(request: &Request, message: impl Into<String>) -> Response {
    Response::error(request.request_id(), ErrorDetail::new(ErrorKind::WrongArgument, message))
}

struct HelpCommand {
    text: String,
}
impl Command for HelpCommand {
    fn name(&self) -> &'static str { "help" }
    fn description(&self) -> &'static str { "вывести справку по доступным командам" }

    fn execute(&self, request: &Request) -> Response {
        Response::normal(request.request_id(), self.text.clone())
    }

    fn package_body(&self, args: &[String]) -> Result<RequestBody, CommandExecuteError> {
        no_args(args)
    }
}

struct InfoCommand {
    collection: Arc<TicketCollection>,
}
impl Command for InfoCommand {
    fn name(&self) -> &'static str { "info" }
    fn description(&self) -> &'static str { "вывести информацию о коллекции" }

    fn execute(&self, request: &Request) -> Response {
        let text = format!(
            "ИНФОРМАЦИЯ О КОЛЛЕКЦИИ\nТип коллекции: TicketCollection\nКоличество элементов: {}\nДата инициализации: {}\nДата последнего изменения: {}",
            self.collection.len(),
            self.collection.initialized_at(),
            self.collection.last_modified_at(),
        );
        Response::normal(request.request_id(), text)
    }

    fn package_body(&self, args: &[String]) -> Result<RequestBody, CommandExecuteError> {
        no_args(args)
    }
}

struct ShowCommand {
    collection: Arc<TicketCollection>,
}
impl Command for ShowCommand {
    fn name(&self) -> &'static str { "show" }
    fn description(&self) -> &'static str { "вывести все элементы коллекции" }

    fn execute(&self, request: &Request) -> Response {
        let tickets = self.collection.snapshot();
        if tickets.is_empty() {
            return Response::normal(request.request_id(), EMPTY_COLLECTION_MESSAGE);
        }
        Response::normal(request.request_id(), COLLECTION_ELEMENTS_MESSAGE)
            .with_tickets(tickets)
    }

    fn package_body(&self, args: &[String]) -> Result<RequestBody, CommandExecuteError> {
        no_args(args)
    }
}

struct AddCommand {
    collection: Arc<TicketCollection>,
}
impl AddCommand {
    const USAGE: &'static str = "Использование: add <name> <x> <y> <price> <VIP|USUAL|BUDGETARY|CHEAP>";

    fn parse_ticket(args: &[String]) -> Option<Ticket> {
        match args {
            [name, x, y, price, kind] => Some(Ticket {
                id: 0,
                name: name.clone(),
                coordinates: Coordinates {
                    x: x.parse().ok()?,
                    y: y.parse().ok()?,
                },
                creation_date: 0,
                price: price.parse().ok()?,
                kind: TicketKind::parse(kind)?,
                person: None,
                owner: None,
            }),
            _ => None,
        }
    }
}
impl Command for AddCommand {
    fn name(&self) -> &'static str { "add" }
    fn description(&self) -> &'static str { "добавить новый элемент в коллекцию" }

    fn execute(&self, request: &Request) -> Response {
        let auth = match require_auth(request) {
            Ok(auth) => auth,
            Err(response) => return response,
        };
        let Some(ticket) = request.body().ticket() else {
            return wrong_argument(request, "Ожидался билет Ticket.");
        };

        let id = self.collection.add(ticket.clone(), &auth.username);
        Response::normal(request.request_id(), format!("Билет успешно добавлен, id={}.", id))
    }

    fn package_body(&self, args: &[String]) -> Result<RequestBody, CommandExecuteError> {
        let ticket = Self::parse_ticket(args)
            .ok_or_else(|| CommandExecuteError::WrongArguments(Self::USAGE.to_string()))?;
        Ok(RequestBody::WithTicket { args: Vec::new(), ticket })
    }
}

struct RemoveByIdCommand {
    collection: Arc<TicketCollection>,
}
impl Command for RemoveByIdCommand {
    fn name(&self) -> &'static str { "remove_by_id" }
    fn description(&self) -> &'static str { "удалить элемент по id" }

    fn execute(&self, request: &Request) -> Response {
        let auth = match require_auth(request) {
            Ok(auth) => auth,
            Err(response) => return response,
        };
        let Some(id) = request.body().arg(0).and_then(|s| s.parse::<i32>().ok()) else {
            return wrong_argument(request, ONE_ARG);
        };

        match self.collection.remove_owned(id, &auth.username) {
            OwnedChange::Applied => Response::normal(request.request_id(), format!("Удален элемент с id={}", id)),
            OwnedChange::NotFound => Response::error(request.request_id(), ErrorDetail::new(
                ErrorKind::NotFound, format!("Элемент с id={} не найден.", id))),
            OwnedChange::NotOwner => Response::error(request.request_id(), ErrorDetail::new(
                ErrorKind::Authentication, format!("Элемент с id={} принадлежит другому пользователю.", id))),
        }
    }

    fn package_body(&self, args: &[String]) -> Result<RequestBody, CommandExecuteError> {
        match args {
            [id] => {
                id.parse::<i32>()
                    .map_err(|e| CommandExecuteError::WrongArguments(e.to_string()))?;
                Ok(RequestBody::Args(args.to_vec()))
            }
            _ => Err(CommandExecuteError::WrongArguments(ONE_ARG.to_string())),
        }
    }
}

struct UpdateCommand {
    collection: Arc<TicketCollection>,
}
impl UpdateCommand {
    const USAGE: &'static str = "Использование: update <id> <name> <x> <y> <price> <VIP|USUAL|BUDGETARY|CHEAP>";
}
impl Command for UpdateCommand {
    fn name(&self) -> &'static str { "update" }
    fn description(&self) -> &'static str { "обновить значение элемента коллекции по его id" }

    fn execute(&self, request: &Request) -> Response {
        let auth = match require_auth(request) {
            Ok(auth) => auth,
            Err(response) => return response,
        };
        let Some(id) = request.body().arg(0).and_then(|s| s.parse::<i32>().ok()) else {
            return wrong_argument(request, Self::USAGE);
        };
        let Some(ticket) = request.body().ticket() else {
            return wrong_argument(request, "Ожидался билет Ticket.");
        };

        match self.collection.update_owned(id, ticket.clone(), &auth.username) {
            OwnedChange::Applied => Response::normal(request.request_id(), format!("Элемент с id={} обновлён.", id)),
            OwnedChange::NotFound => Response::error(request.request_id(), ErrorDetail::new(
                ErrorKind::NotFound, format!("Элемент с id={} не найден.", id))),
            OwnedChange::NotOwner => Response::error(request.request_id(), ErrorDetail::new(
                ErrorKind::Authentication, format!("Элемент с id={} принадлежит другому пользователю.", id))),
        }
    }

    fn package_body(&self, args: &[String]) -> Result<RequestBody, CommandExecuteError> {
        let wrong = || CommandExecuteError::WrongArguments(Self::USAGE.to_string());
        let [id, rest @ ..] = args else {
            return Err(wrong());
        };
        id.parse::<i32>().map_err(|_| wrong())?;
        let ticket = AddCommand::parse_ticket(rest).ok_or_else(wrong)?;
        Ok(RequestBody::WithTicket { args: vec![id.clone()], ticket })
    }
}

struct ClearCommand {
    collection: Arc<TicketCollection>,
}
impl Command for ClearCommand {
    fn name(&self) -> &'static str { "clear" }
    fn description(&self) -> &'static str { "очистить коллекцию" }

    fn execute(&self, request: &Request) -> Response {
        let auth = match require_auth(request) {
            Ok(auth) => auth,
            Err(response) => return response,
        };
        let removed = self.collection.clear_owned(&auth.username);
        debug!(username = %auth.username, removed, "cleared tickets");
        Response::normal(request.request_id(), "Коллекция очищена.")
    }

    fn package_body(&self, args: &[String]) -> Result<RequestBody, CommandExecuteError> {
        no_args(args)
    }
}

struct SendMessageCommand;
impl Command for SendMessageCommand {
    fn name(&self) -> &'static str { "send_message" }
    fn description(&self) -> &'static str { "отправить сообщение всем активным пользователям" }

    fn execute(&self, request: &Request) -> Response {
        let auth = match require_auth(request) {
            Ok(auth) => auth,
            Err(response) => return response,
        };
        let Some(text) = request.body().arg(0) else {
            return wrong_argument(request, ONE_ARG);
        };
        Response::broadcast(format!("{}: {}", auth.username, text))
    }

    /// the message is free text, so all words are joined into the single argument
    fn package_body(&self, args: &[String]) -> Result<RequestBody, CommandExecuteError> {
        if args.is_empty() {
            return Err(CommandExecuteError::WrongArguments(ONE_ARG.to_string()));
        }
        Ok(RequestBody::Args(vec![args.join(" ")]))
    }
}

/// The reference [CommandDispatcher]: a fixed set of commands working on a shared
///  [TicketCollection].
pub struct CommandRegistry {
    commands: FxHashMap<&'static str, Box<dyn Command>>,
}

impl CommandRegistry {
    pub fn new(collection: Arc<TicketCollection>) -> CommandRegistry {
        let mut commands: FxHashMap<&'static str, Box<dyn Command>> = FxHashMap::default();
        let mut register = |command: Box<dyn Command>| {
            commands.insert(command.name(), command);
        };
        register(Box::new(InfoCommand { collection: collection.clone() }));
        register(Box::new(ShowCommand { collection: collection.clone() }));
        register(Box::new(AddCommand { collection: collection.clone() }));
        register(Box::new(RemoveByIdCommand { collection: collection.clone() }));
        register(Box::new(UpdateCommand { collection: collection.clone() }));
        register(Box::new(ClearCommand { collection }));
        register(Box::new(SendMessageCommand));

        let mut help = HelpCommand { text: String::new() };
        let mut lines = commands.values()
            .map(|c| (c.name(), c.description()))
            .chain(std::iter::once((help.name(), help.description())))
            .collect::<Vec<_>>();
        lines.sort();
        help.text = lines.into_iter()
            .fold("ДОСТУПНЫЕ КОМАНДЫ:".to_string(), |acc, (name, description)| format!("{}\n{} - {}", acc, name, description));
        commands.insert(help.name(), Box::new(help));

        CommandRegistry { commands }
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        let mut result = self.commands.keys().copied().collect::<Vec<_>>();
        result.sort();
        result
    }
}

impl CommandDispatcher for CommandRegistry {
    fn execute(&self, request: &Request) -> Response {
        match self.commands.get(request.command_name()) {
            Some(command) => {
                debug!(request_id = %request.request_id(), command = request.command_name(), "executing command");
                command.execute(request)
            }
            None => {
                debug!(request_id = %request.request_id(), command = request.command_name(), "unknown command");
                Response::error(request.request_id(), ErrorDetail::new(
                    ErrorKind::UnknownCommand,
                    format!("Неизвестная команда '{}'.", request.command_name()),
                ))
            }
        }
    }

    fn package_body(&self, command_name: &str, args: &[String]) -> Result<RequestBody, CommandExecuteError> {
        self.commands.get(command_name)
            .ok_or_else(|| CommandExecuteError::UnknownCommand(command_name.to_string()))?
            .package_body(args)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::messaging::message::ResponseKind;
    use crate::model::ticket::tests::sample_ticket;
    use super::*;

    fn registry() -> (CommandRegistry, Arc<TicketCollection>) {
        let collection = Arc::new(TicketCollection::default());
        (CommandRegistry::new(collection.clone()), collection)
    }

    fn request(name: &str, body: RequestBody, user: Option<&str>) -> Request {
        Request::new(name, body, user.map(|u| AuthCredentials::new(u, "pw")))
    }

    fn args(args: &[&str]) -> RequestBody {
        RequestBody::Args(args.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_show_empty() {
        let (registry, _) = registry();
        let request = request("show", RequestBody::empty(), None);
        let response = registry.execute(&request);

        assert_eq!(response.kind(), ResponseKind::Normal);
        assert_eq!(response.message(), EMPTY_COLLECTION_MESSAGE);
        assert_eq!(response.request_id(), Some(request.request_id()));
        assert!(response.tickets().is_none());
        assert!(response.error_detail().is_none());
    }

    #[test]
    fn test_add_then_show() {
        let (registry, _) = registry();
        let add = request("add", RequestBody::WithTicket { args: vec![], ticket: sample_ticket(0, None) }, Some("alice"));
        let response = registry.execute(&add);
        assert!(response.error_detail().is_none(), "{:?}", response);

        let response = registry.execute(&request("show", RequestBody::empty(), None));
        assert_eq!(response.message(), COLLECTION_ELEMENTS_MESSAGE);
        let tickets = response.tickets().unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].owner.as_deref(), Some("alice"));
    }

    #[rstest]
    #[case::unknown(request("frobnicate", RequestBody::empty(), Some("bob")), ErrorKind::UnknownCommand)]
    #[case::add_unauthenticated(request("add", RequestBody::WithTicket { args: vec![], ticket: sample_ticket(0, None) }, None), ErrorKind::Authentication)]
    #[case::add_without_ticket(request("add", RequestBody::empty(), Some("bob")), ErrorKind::WrongArgument)]
    #[case::remove_unauthenticated(request("remove_by_id", args(&["1"]), None), ErrorKind::Authentication)]
    #[case::remove_not_a_number(request("remove_by_id", args(&["x"]), Some("bob")), ErrorKind::WrongArgument)]
    #[case::remove_missing(request("remove_by_id", args(&["17"]), Some("bob")), ErrorKind::NotFound)]
    #[case::update_unauthenticated(request("update", RequestBody::WithTicket { args: vec!["1".to_string()], ticket: sample_ticket(0, None) }, None), ErrorKind::Authentication)]
    #[case::update_without_id(request("update", RequestBody::WithTicket { args: vec![], ticket: sample_ticket(0, None) }, Some("bob")), ErrorKind::WrongArgument)]
    #[case::update_without_ticket(request("update", args(&["1"]), Some("bob")), ErrorKind::WrongArgument)]
    #[case::update_missing(request("update", RequestBody::WithTicket { args: vec!["17".to_string()], ticket: sample_ticket(0, None) }, Some("bob")), ErrorKind::NotFound)]
    #[case::clear_unauthenticated(request("clear", RequestBody::empty(), None), ErrorKind::Authentication)]
    #[case::message_unauthenticated(request("send_message", args(&["hi"]), None), ErrorKind::Authentication)]
    #[case::message_without_text(request("send_message", RequestBody::empty(), Some("bob")), ErrorKind::WrongArgument)]
    fn test_errors_are_responses(#[case] request: Request, #[case] expected: ErrorKind) {
        let (registry, _) = registry();
        let response = registry.execute(&request);
        assert_eq!(response.kind(), ResponseKind::Normal);
        assert_eq!(response.request_id(), Some(request.request_id()));
        assert_eq!(response.error_detail().map(|e| e.kind), Some(expected));
    }

    #[test]
    fn test_remove_foreign_ticket() {
        let (registry, collection) = registry();
        let id = collection.add(sample_ticket(0, None), "alice");

        let response = registry.execute(&request("remove_by_id", args(&[id.to_string().as_str()]), Some("bob")));
        assert_eq!(response.error_detail().map(|e| e.kind), Some(ErrorKind::Authentication));
        assert_eq!(collection.len(), 1);

        let response = registry.execute(&request("remove_by_id", args(&[id.to_string().as_str()]), Some("alice")));
        assert!(response.error_detail().is_none());
        assert!(collection.is_empty());
    }

    #[test]
    fn test_send_message_is_broadcast() {
        let (registry, _) = registry();
        let response = registry.execute(&request("send_message", args(&["hi"]), Some("bob")));
        assert_eq!(response.kind(), ResponseKind::Broadcast);
        assert_eq!(response.message(), "bob: hi");
        assert_eq!(response.request_id(), None);
    }

    #[test]
    fn test_help_lists_all_commands() {
        let (registry, _) = registry();
        let response = registry.execute(&request("help", RequestBody::empty(), None));
        for name in registry.command_names() {
            assert!(response.message().contains(&format!("{} - ", name)), "{} missing in help", name);
        }
    }

    #[rstest]
    #[case::show("show", &[], Ok(RequestBody::empty()))]
    #[case::show_with_args("show", &["x"], Err(CommandExecuteError::WrongArguments(NO_ARGS.to_string())))]
    #[case::remove("remove_by_id", &["5"], Ok(args(&["5"])))]
    #[case::remove_not_a_number("remove_by_id", &["five"], Err(CommandExecuteError::WrongArguments("invalid digit found in string".to_string())))]
    #[case::message_joined("send_message", &["hello", "world"], Ok(args(&["hello world"])))]
    #[case::message_empty("send_message", &[], Err(CommandExecuteError::WrongArguments(ONE_ARG.to_string())))]
    #[case::unknown("frobnicate", &[], Err(CommandExecuteError::UnknownCommand("frobnicate".to_string())))]
    fn test_package_body(#[case] name: &str, #[case] raw_args: &[&str], #[case] expected: Result<RequestBody, CommandExecuteError>) {
        let (registry, _) = registry();
        let raw_args = raw_args.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(registry.package_body(name, &raw_args), expected);
    }

    #[test]
    fn test_package_add() {
        let (registry, _) = registry();
        let raw_args = ["concert", "1.5", "-3", "42.0", "vip"].iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let body = registry.package_body("add", &raw_args).unwrap();
        let ticket = body.ticket().unwrap();
        assert_eq!(ticket.name, "concert");
        assert_eq!(ticket.coordinates.y, -3);
        assert_eq!(ticket.kind, TicketKind::Vip);

        assert!(registry.package_body("add", &raw_args[..3]).is_err());
    }

    #[test]
    fn test_update_foreign_ticket() {
        let (registry, collection) = registry();
        let id = collection.add(sample_ticket(0, None), "alice");

        let mut changed = sample_ticket(0, None);
        changed.name = "opera".to_string();
        let update = |user: &str| request("update", RequestBody::WithTicket { args: vec![id.to_string()], ticket: changed.clone() }, Some(user));

        let response = registry.execute(&update("bob"));
        assert_eq!(response.error_detail().map(|e| e.kind), Some(ErrorKind::Authentication));
        assert_eq!(collection.snapshot()[0].name, "ticket-0");

        let response = registry.execute(&update("alice"));
        assert!(response.error_detail().is_none(), "{:?}", response);
        assert_eq!(response.message(), format!("Элемент с id={} обновлён.", id));
        let tickets = collection.snapshot();
        assert_eq!(tickets[0].name, "opera");
        assert_eq!(tickets[0].owner.as_deref(), Some("alice"));
    }

    #[rstest]
    #[case::complete(&["7", "opera", "1", "2", "10.5", "cheap"], true)]
    #[case::id_not_a_number(&["seven", "opera", "1", "2", "10.5", "cheap"], false)]
    #[case::ticket_incomplete(&["7", "opera", "1"], false)]
    #[case::no_args(&[], false)]
    fn test_package_update(#[case] raw_args: &[&str], #[case] valid: bool) {
        let (registry, _) = registry();
        let raw_args = raw_args.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        match registry.package_body("update", &raw_args) {
            Ok(body) => {
                assert!(valid);
                assert_eq!(body.arg(0), Some("7"));
                assert_eq!(body.ticket().map(|t| t.kind), Some(TicketKind::Cheap));
            }
            Err(e) => {
                assert!(!valid);
                assert_eq!(e, CommandExecuteError::WrongArguments(UpdateCommand::USAGE.to_string()));
            }
        }
    }
}
