use chumsky::prelude::*;
use otterc_ast::{BinaryOp, CompareOp, Expr, UnaryOp};

use crate::error::ParseError;

/// Parse a single eval expression. Surrounding whitespace is ignored.
pub fn parse(source: &str) -> Result<Expr, Vec<ParseError>> {
    expression()
        .padded()
        .then_ignore(end())
        .parse(source)
        .map_err(|errors| errors.into_iter().map(ParseError::from).collect())
}

fn op(symbol: &'static str) -> impl Parser<char, &'static str, Error = Simple<char>> + Clone {
    just(symbol).padded()
}

fn keyword(name: &'static str) -> impl Parser<char, (), Error = Simple<char>> + Clone {
    text::keyword(name).padded()
}

fn string_literal(quote: char) -> impl Parser<char, Expr, Error = Simple<char>> + Clone {
    let escape = just('\\').ignore_then(choice((
        just('\\'),
        just('"'),
        just('\''),
        just('n').to('\n'),
        just('t').to('\t'),
        just('r').to('\r'),
        just('0').to('\0'),
    )));

    just(quote)
        .ignore_then(
            filter(move |c: &char| *c != quote && *c != '\\' && *c != '\n')
                .or(escape)
                .repeated(),
        )
        .then_ignore(just(quote))
        .collect::<String>()
        .map(Expr::string)
}

fn number() -> impl Parser<char, Expr, Error = Simple<char>> + Clone {
    let float = text::int(10)
        .then_ignore(just('.'))
        .then(text::digits(10).or_not())
        .try_map(|(whole, frac): (String, Option<String>), span| {
            let literal = format!("{whole}.{}", frac.unwrap_or_default());
            literal
                .parse::<f64>()
                .map(Expr::float)
                .map_err(|_| Simple::custom(span, format!("invalid float literal `{literal}`")))
        });

    let int = text::int(10).try_map(|digits: String, span| {
        digits
            .parse::<i64>()
            .map(Expr::int)
            .map_err(|_| {
                Simple::custom(span, format!("integer literal `{digits}` is out of range"))
            })
    });

    float.or(int)
}

fn expression() -> impl Parser<char, Expr, Error = Simple<char>> {
    recursive(|expr| {
        let constant = keyword("None")
            .to(Expr::none())
            .or(keyword("True").to(Expr::bool(true)))
            .or(keyword("False").to(Expr::bool(false)));

        let atom = number()
            .or(string_literal('"'))
            .or(string_literal('\''))
            .or(constant)
            .or(expr.delimited_by(just('('), just(')')))
            .padded();

        // `**` binds tighter than a unary operator on its left and looser on its right.
        let unary = recursive(|unary| {
            let power = atom
                .clone()
                .then(op("**").ignore_then(unary.clone()).or_not())
                .map(|(base, exponent)| match exponent {
                    Some(exponent) => Expr::binary(base, BinaryOp::Pow, exponent),
                    None => base,
                });

            op("-")
                .to(UnaryOp::Neg)
                .or(op("+").to(UnaryOp::Pos))
                .then(unary)
                .map(|(op, expr)| Expr::unary(op, expr))
                .or(power)
        });

        let product = unary
            .clone()
            .then(
                op("//")
                    .to(BinaryOp::FloorDiv)
                    .or(op("*").to(BinaryOp::Mul))
                    .or(op("/").to(BinaryOp::Div))
                    .or(op("%").to(BinaryOp::Mod))
                    .then(unary)
                    .repeated(),
            )
            .foldl(|left, (op, right)| Expr::binary(left, op, right));

        let sum = product
            .clone()
            .then(
                op("+")
                    .to(BinaryOp::Add)
                    .or(op("-").to(BinaryOp::Sub))
                    .then(product)
                    .repeated(),
            )
            .foldl(|left, (op, right)| Expr::binary(left, op, right));

        let comparison_op = op("==")
            .to(CompareOp::Eq)
            .or(op("!=").to(CompareOp::Ne))
            .or(op("<=").to(CompareOp::Le))
            .or(op(">=").to(CompareOp::Ge))
            .or(op("<").to(CompareOp::Lt))
            .or(op(">").to(CompareOp::Gt));

        let comparison = sum
            .clone()
            .then(comparison_op.then(sum).or_not())
            .map(|(left, rest)| match rest {
                Some((op, right)) => Expr::compare(left, op, right),
                None => left,
            });

        keyword("not")
            .repeated()
            .then(comparison)
            .foldr(|_, expr| Expr::unary(UnaryOp::Not, expr))
    })
}
